//! PULSE SLO 目标跟踪
//!
//! [`SloTracker`] 按名称管理一组成功率目标（SLO），
//! 对每个目标维护测量窗口内的成功/失败采样，
//! 计算当前达成率、剩余错误预算与燃烧率，
//! 并据此给出 healthy / warning / critical 分级。

pub mod model;
pub mod tracker;

pub use model::{ComplianceReport, SloDefinition, SloHealth, SloSample, SloStatus};
pub use tracker::SloTracker;
