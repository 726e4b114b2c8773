//! PULSE 可靠性平台核心库
//!
//! 提供各业务 crate 共享的基础设施：
//! - 统一错误类型 [`PulseError`]
//! - 可注入时钟 [`Clock`]（含测试用 [`ManualClock`]）

pub mod clock;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{PulseError, Result};

/// 四舍五入保留两位小数
///
/// 成功率、错误预算等对外展示的百分比统一经过该函数。
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
