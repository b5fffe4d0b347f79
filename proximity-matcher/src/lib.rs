//! Proximity Matcher - 邻近匹配服务
//!
//! 消费新行程事件，对在线司机做地理过滤，产出候选集：
//!
//! - 球面模型 haversine 距离，半径 1 km
//! - 车辆类型等值过滤
//! - 坐标过期的司机不参与匹配
//! - 不排序、不限量，所有命中者同时收到派单 (先接先得)
//!
//! 空候选集不发事件，乘客侧靠超时感知无车。

pub mod api;
pub mod error;
pub mod geo;
pub mod matcher;
pub mod store;

pub use error::{MatcherError, MatcherResult};
pub use geo::haversine_km;
pub use matcher::{MATCH_RADIUS_KM, find_candidates, run_candidate_consumer};
pub use store::{DriverRecord, DriverStore};
