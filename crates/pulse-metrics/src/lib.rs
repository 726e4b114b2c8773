//! PULSE 指标采集与聚合
//!
//! [`MetricsCollector`] 负责接收运行时产生的指标样本，
//! 维护容量受限的原始样本历史，并由后台任务周期性地
//! 计算聚合窗口（百分位、成功率等），供查询与告警使用。

pub mod collector;
pub mod model;
pub mod stats;

pub use collector::{CollectorConfig, MetricsCollector};
pub use model::{
    AggregatePeriod, AggregatedWindow, AudioQualityAggregate, ConnectionAggregate, KindAggregate,
    MetricKind, MetricSample, PerformanceSummary,
};
pub use stats::percentile;
