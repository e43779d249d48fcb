//! 事件模块
//!
//! - `types.rs`: 上传任务事件，供界面层订阅
//! - `throttle.rs`: 进度事件节流

mod throttle;
mod types;

pub use throttle::*;
pub use types::*;
