use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 指标类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// 首次响应延迟（毫秒）
    FirstResponseLatency,
    /// 会话时长（毫秒）
    SessionDuration,
    /// 工具调用耗时（毫秒）
    ToolCallDuration,
    /// 依赖接口响应时间（毫秒）
    ApiResponseTime,
    /// 连接结果（1.0 成功 / 0.0 失败）
    ConnectionOutcome,
    /// 音频质量评分（0-100）
    AudioQuality,
    /// 自定义指标
    Custom(String),
}

impl MetricKind {
    pub fn as_str(&self) -> &str {
        match self {
            MetricKind::FirstResponseLatency => "first_response_latency",
            MetricKind::SessionDuration => "session_duration",
            MetricKind::ToolCallDuration => "tool_call_duration",
            MetricKind::ApiResponseTime => "api_response_time",
            MetricKind::ConnectionOutcome => "connection_outcome",
            MetricKind::AudioQuality => "audio_quality",
            MetricKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 指标样本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// 采集时间
    pub timestamp: DateTime<Utc>,
    /// 指标类型
    pub kind: MetricKind,
    /// 指标值
    pub value: f64,
    /// 本次操作是否成功
    pub success: bool,
    /// 关联会话
    #[serde(default)]
    pub session_id: Option<String>,
    /// 附加维度
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MetricSample {
    /// 创建新样本，时间戳取当前系统时间
    pub fn new(kind: MetricKind, value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            value,
            success: true,
            session_id: None,
            metadata: HashMap::new(),
        }
    }

    /// 设置成功标记
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// 设置关联会话
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// 设置采集时间
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 附加一个维度
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// 聚合周期标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatePeriod {
    Minute,
    Hour,
    Day,
}

impl AggregatePeriod {
    pub fn as_str(&self) -> &str {
        match self {
            AggregatePeriod::Minute => "minute",
            AggregatePeriod::Hour => "hour",
            AggregatePeriod::Day => "day",
        }
    }
}

impl fmt::Display for AggregatePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单一指标类型的聚合结果
///
/// 百分位取原始值，平均值与成功率保留两位小数。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KindAggregate {
    pub count: usize,
    pub average: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    /// 成功率（百分比）
    pub success_rate: f64,
}

/// 连接结果聚合
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionAggregate {
    pub total: usize,
    pub successes: usize,
    /// 成功率（百分比）
    pub success_rate: f64,
}

/// 音频质量聚合
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioQualityAggregate {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

/// 聚合窗口
///
/// 连接结果与音频质量单独聚合，不出现在 `kinds` 中。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedWindow {
    pub period: AggregatePeriod,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// 窗口内样本总数
    pub sample_count: usize,
    /// 按指标类型名索引的聚合结果
    pub kinds: HashMap<String, KindAggregate>,
    pub connection: ConnectionAggregate,
    pub audio_quality: AudioQualityAggregate,
}

/// 性能摘要
///
/// 基于原始样本实时计算，覆盖最近一小时。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub generated_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub total_samples: usize,
    pub kinds: HashMap<String, KindAggregate>,
    pub connection: ConnectionAggregate,
    pub audio_quality: AudioQualityAggregate,
}
