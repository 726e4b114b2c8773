//! PULSE 命名熔断器
//!
//! 为不可靠依赖提供 CLOSED / OPEN / HALF_OPEN 三态熔断保护：
//! 失败达到阈值后快速拒绝调用，超时后放行有限探测，
//! 探测通过则恢复。[`BreakerRegistry`] 按名称管理一组熔断器，
//! 同名调用共享同一实例。

pub mod breaker;
pub mod config;
pub mod error;
pub mod registry;

pub use breaker::{BreakerMetrics, BreakerState, CircuitBreaker};
pub use config::BreakerConfig;
pub use error::CallError;
pub use registry::BreakerRegistry;
