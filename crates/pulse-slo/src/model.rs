use chrono::{DateTime, Utc};
use pulse_core::PulseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// SLO 定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloDefinition {
    /// 目标名称（唯一键）
    pub name: String,
    /// 目标成功率（百分比，如 99.5）
    pub target: f64,
    /// 测量窗口
    pub window: Duration,
    /// 燃烧率告警阈值
    pub burn_rate_threshold: f64,
}

impl SloDefinition {
    /// 创建 SLO 定义，窗口默认 5 分钟，燃烧率阈值默认 2.0
    pub fn new(name: impl Into<String>, target: f64) -> Self {
        Self {
            name: name.into(),
            target,
            window: Duration::from_secs(300),
            burn_rate_threshold: 2.0,
        }
    }

    /// 设置测量窗口
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// 设置燃烧率告警阈值
    pub fn with_burn_rate_threshold(mut self, threshold: f64) -> Self {
        self.burn_rate_threshold = threshold;
        self
    }

    /// 校验定义
    pub fn validate(&self) -> pulse_core::Result<()> {
        if self.name.is_empty() {
            return Err(PulseError::invalid_input("slo name must not be empty"));
        }
        if !(self.target > 0.0 && self.target <= 100.0) {
            return Err(PulseError::invalid_input(format!(
                "slo target must be in (0, 100], got {}",
                self.target
            )));
        }
        if self.window.is_zero() {
            return Err(PulseError::invalid_input("slo window must be greater than 0"));
        }
        if self.burn_rate_threshold <= 0.0 {
            return Err(PulseError::invalid_input(
                "burn_rate_threshold must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 单次成功/失败采样
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SloSample {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// SLO 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SloHealth {
    Healthy,
    Warning,
    Critical,
}

impl SloHealth {
    pub fn as_str(&self) -> &str {
        match self {
            SloHealth::Healthy => "healthy",
            SloHealth::Warning => "warning",
            SloHealth::Critical => "critical",
        }
    }
}

impl fmt::Display for SloHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SLO 当前状态快照
///
/// 无样本时取乐观默认值：达成率 100、预算 100、燃烧率 0。
#[derive(Debug, Clone, Serialize)]
pub struct SloStatus {
    pub name: String,
    /// 目标成功率（百分比）
    pub target: f64,
    /// 当前达成率（百分比，保留两位小数）
    pub current: f64,
    /// 剩余错误预算（百分比）
    pub error_budget: f64,
    /// 错误预算燃烧率，目标为 100% 且出现失败时为无穷大
    pub burn_rate: f64,
    pub health: SloHealth,
    /// 窗口内样本总数
    pub total_samples: usize,
    /// 窗口内失败样本数
    pub failed_samples: usize,
    pub generated_at: DateTime<Utc>,
}

/// 全局合规报告
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    /// 整体状态：任一 critical 则 critical，否则任一 warning 则 warning
    pub overall: SloHealth,
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
    pub slos: Vec<SloStatus>,
    pub generated_at: DateTime<Utc>,
}
