//! PULSE 运行时装配
//!
//! [`PulseRuntime`] 把熔断器注册表、指标收集器、SLO 跟踪器与
//! 告警管理器装配成进程内共享的应用根：依赖调用经由
//! [`PulseRuntime::call`] 执行并自动记录结果，后台任务周期性
//! 评估告警规则并清理过期数据。

pub mod logging;
pub mod runtime;

pub use logging::init as init_logging;
pub use runtime::{PulseRuntime, PulseRuntimeBuilder};
