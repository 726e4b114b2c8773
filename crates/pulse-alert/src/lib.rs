//! PULSE 告警管理
//!
//! [`AlertManager`] 维护一组声明式告警规则，对运行时提供的
//! 上下文快照求值并生成节流后的告警记录，
//! 同时管理告警的确认 / 解决生命周期与有界历史。

pub mod manager;
pub mod model;
pub mod rule;

pub use manager::AlertManager;
pub use model::{Alert, AlertSeverity, AlertStats};
pub use rule::{AlertRule, RuleCategory, RuleCondition, RuleContext};
