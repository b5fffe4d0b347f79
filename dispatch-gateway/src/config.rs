//! 节点配置
//!
//! # 环境变量
//!
//! | 环境变量 | 默认值 | 说明 |
//! |----------|--------|------|
//! | WORK_DIR | /var/lib/dispatch/node | 工作目录 (redb 数据文件) |
//! | HTTP_PORT | 3000 | HTTP API 端口 |
//! | LIVE_TCP_PORT | 8090 | 实时长连接端口 |
//! | ENVIRONMENT | development | 运行环境 |
//! | LIVE_CHANNEL_CAPACITY | 64 | 单连接出站缓冲 (条) |
//! | MATCHER_STALE_AFTER_SECS | 120 | 司机坐标过期窗口 (秒) |
//! | LOG_DIR | (无) | 日志目录，设置后按天滚动写文件 |

use std::path::PathBuf;

/// 节点配置
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存放 redb 数据文件
    pub work_dir: String,
    /// HTTP API 端口
    pub http_port: u16,
    /// 实时长连接 TCP 端口
    pub live_tcp_port: u16,
    /// 运行环境: development | staging | production
    pub environment: String,
    /// 单连接出站缓冲容量，满了直接丢 (best-effort)
    pub live_channel_capacity: usize,
    /// 司机坐标过期窗口 (秒)，与乘客等待窗口同级
    pub matcher_stale_after_secs: u64,
    /// 日志目录 (可选)
    pub log_dir: Option<String>,
}

impl Config {
    /// 从环境变量加载配置，未设置的项用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/dispatch/node".into()),
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            live_tcp_port: std::env::var("LIVE_TCP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8090),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            live_channel_capacity: std::env::var("LIVE_CHANNEL_CAPACITY")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(64),
            matcher_stale_after_secs: std::env::var("MATCHER_STALE_AFTER_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(120),
            log_dir: std::env::var("LOG_DIR").ok(),
        }
    }

    /// 覆盖部分配置，测试场景用
    pub fn with_overrides(
        work_dir: impl Into<String>,
        http_port: u16,
        live_tcp_port: u16,
    ) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config.live_tcp_port = live_tcp_port;
        config
    }

    pub fn bus_db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("bus.redb")
    }

    pub fn rides_db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("rides.redb")
    }

    pub fn drivers_db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("drivers.redb")
    }

    pub fn matcher_stale_after_ms(&self) -> i64 {
        (self.matcher_stale_after_secs as i64) * 1000
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 是否开发环境
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
