use serde::{Deserialize, Serialize};

/// PULSE 全局配置
///
/// 各分节在配置文件中缺失时取默认值，组件在启动时
/// 把这些纯数值映射为自己的运行配置。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub breaker: BreakerDefaults,
    #[serde(default)]
    pub metrics: MetricsDefaults,
    #[serde(default)]
    pub slo: Vec<SloTarget>,
    #[serde(default)]
    pub alert: AlertDefaults,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            breaker: BreakerDefaults::default(),
            metrics: MetricsDefaults::default(),
            slo: Vec::new(),
            alert: AlertDefaults::default(),
        }
    }
}

/// 系统配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    pub name: String,
    pub version: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "PULSE Reliability Platform".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

/// 熔断器默认参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerDefaults {
    pub failure_threshold: u32,
    pub timeout_ms: u64,
    pub success_threshold: u32,
    pub request_timeout_ms: u64,
    pub volume_threshold: u32,
}

impl Default for BreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_ms: 30_000,
            success_threshold: 3,
            request_timeout_ms: 10_000,
            volume_threshold: 10,
        }
    }
}

/// 指标收集默认参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsDefaults {
    pub history_capacity: usize,
    pub aggregation_interval_ms: u64,
    pub aggregate_retention_hours: u64,
}

impl Default for MetricsDefaults {
    fn default() -> Self {
        Self {
            history_capacity: 10_000,
            aggregation_interval_ms: 60_000,
            aggregate_retention_hours: 24,
        }
    }
}

/// 单个 SLO 目标
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SloTarget {
    pub name: String,
    /// 目标成功率（百分比）
    pub target: f64,
    #[serde(default = "default_slo_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_burn_rate_threshold")]
    pub burn_rate_threshold: f64,
}

fn default_slo_window_secs() -> u64 {
    300
}

fn default_burn_rate_threshold() -> f64 {
    2.0
}

/// 告警默认参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertDefaults {
    pub max_history: usize,
    pub evaluation_interval_ms: u64,
    /// 已解决告警的保留时长
    pub retention_hours: u64,
}

impl Default for AlertDefaults {
    fn default() -> Self {
        Self {
            max_history: 10_000,
            evaluation_interval_ms: 30_000,
            retention_hours: 24,
        }
    }
}
