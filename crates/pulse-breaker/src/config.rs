use pulse_core::PulseError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 熔断器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// 触发熔断的连续失败次数
    pub failure_threshold: u32,
    /// OPEN 状态持续时长，到期后自动进入半开
    pub timeout: Duration,
    /// 半开期关闭电路所需的成功次数，同时是并发探测名额上限
    pub success_threshold: u32,
    /// 单次调用的超时时间
    pub request_timeout: Duration,
    /// 参与熔断判定所需的最小请求数
    pub volume_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_millis(30_000),
            success_threshold: 3,
            request_timeout: Duration::from_millis(10_000),
            volume_threshold: 10,
        }
    }
}

impl BreakerConfig {
    /// 设置失败阈值
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// 设置 OPEN 状态持续时长
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 设置成功阈值
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// 设置单次调用超时
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// 设置最小请求数
    pub fn with_volume_threshold(mut self, threshold: u32) -> Self {
        self.volume_threshold = threshold;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> pulse_core::Result<()> {
        if self.failure_threshold == 0 {
            return Err(PulseError::config("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(PulseError::config("success_threshold must be greater than 0"));
        }
        if self.timeout.is_zero() {
            return Err(PulseError::config("timeout must be greater than 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(PulseError::config("request_timeout must be greater than 0"));
        }
        Ok(())
    }
}
