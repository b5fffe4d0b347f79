//! Dispatch Gateway - 派单网关
//!
//! 持久总线与实时长连接之间的桥。网关持有在线表 (Presence Registry)，
//! 并承担两类投递：
//!
//! - **总线桥接**: 候选集、接单结果等持久事件到达后，查在线表把
//!   实时通知推给在线的参与者；不在线就丢，不排队 (at-most-once)
//! - **即时转发**: 定位心跳、聊天、呼叫信令在连接之间直接转发，
//!   永远不经过持久总线
//!
//! 司机的接单动作反方向走：网关原样转投到持久总线，自己不做裁决。
//!
//! # 模块结构
//!
//! ```text
//! dispatch-gateway/src/
//! ├── config.rs     # 环境变量配置
//! ├── logger.rs     # tracing 初始化
//! ├── presence.rs   # 在线表
//! ├── connection.rs # 单连接读写任务
//! ├── server.rs     # TCP accept 循环
//! ├── relay.rs      # 客户端事件分发 (登记/转发/接单转投)
//! ├── bridge.rs     # 持久总线消费 → 实时推送
//! └── api.rs        # 乘客入口与健康检查路由
//! ```

pub mod api;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod logger;
pub mod presence;
pub mod relay;
pub mod server;

pub use config::Config;
pub use presence::{ConnectionHandle, PresenceRegistry};
