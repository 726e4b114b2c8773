use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pulse_core::{round2, Clock, PulseError, SystemClock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::model::{
    AggregatePeriod, AggregatedWindow, AudioQualityAggregate, ConnectionAggregate, KindAggregate,
    MetricKind, MetricSample, PerformanceSummary,
};
use crate::stats::percentile;

/// 性能摘要覆盖的时间范围
const SUMMARY_WINDOW_SECS: i64 = 3600;

/// 收集器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// 原始样本容量上限，超出后按先进先出丢弃
    pub history_capacity: usize,
    /// 后台聚合周期
    pub aggregation_interval: Duration,
    /// 聚合窗口保留时长
    pub aggregate_retention: Duration,
    /// 聚合窗口标签
    pub period: AggregatePeriod,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            history_capacity: 10_000,
            aggregation_interval: Duration::from_secs(60),
            aggregate_retention: Duration::from_secs(24 * 3600),
            period: AggregatePeriod::Minute,
        }
    }
}

impl CollectorConfig {
    /// 设置样本容量上限
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// 设置聚合周期
    pub fn with_aggregation_interval(mut self, interval: Duration) -> Self {
        self.aggregation_interval = interval;
        self
    }

    /// 设置聚合结果保留时长
    pub fn with_aggregate_retention(mut self, retention: Duration) -> Self {
        self.aggregate_retention = retention;
        self
    }

    /// 设置聚合窗口标签
    pub fn with_period(mut self, period: AggregatePeriod) -> Self {
        self.period = period;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> pulse_core::Result<()> {
        if self.history_capacity == 0 {
            return Err(PulseError::config("history_capacity must be greater than 0"));
        }
        if self.aggregation_interval.is_zero() {
            return Err(PulseError::config("aggregation_interval must be greater than 0"));
        }
        if self.aggregate_retention.is_zero() {
            return Err(PulseError::config("aggregate_retention must be greater than 0"));
        }
        Ok(())
    }
}

/// 指标收集器
///
/// 维护有容量上限的原始样本队列，并由后台任务按固定周期
/// 计算聚合窗口。所有读写都通过异步读写锁，可在任务间共享。
#[derive(Clone)]
pub struct MetricsCollector {
    config: CollectorConfig,
    clock: Arc<dyn Clock>,
    history: Arc<RwLock<VecDeque<MetricSample>>>,
    aggregates: Arc<RwLock<VecDeque<AggregatedWindow>>>,
    running: Arc<RwLock<bool>>,
}

impl MetricsCollector {
    /// 创建使用系统时钟的收集器
    pub fn new(config: CollectorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// 创建使用指定时钟的收集器
    pub fn with_clock(config: CollectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            history: Arc::new(RwLock::new(VecDeque::new())),
            aggregates: Arc::new(RwLock::new(VecDeque::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 获取配置
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// 记录一个样本
    pub async fn record(&self, sample: MetricSample) {
        debug!(kind = %sample.kind, value = sample.value, "Metric recorded");

        let mut history = self.history.write().await;
        history.push_back(sample);
        // 超出容量时丢弃最旧样本
        while history.len() > self.config.history_capacity {
            history.pop_front();
        }
    }

    /// 记录首次响应延迟（毫秒）
    pub async fn record_first_response_latency(&self, latency_ms: f64, session_id: Option<String>) {
        let mut sample = MetricSample::new(MetricKind::FirstResponseLatency, latency_ms)
            .with_timestamp(self.clock.now());
        if let Some(id) = session_id {
            sample = sample.with_session(id);
        }
        self.record(sample).await;
    }

    /// 记录会话时长（毫秒）
    pub async fn record_session_duration(&self, duration_ms: f64, session_id: Option<String>) {
        let mut sample = MetricSample::new(MetricKind::SessionDuration, duration_ms)
            .with_timestamp(self.clock.now());
        if let Some(id) = session_id {
            sample = sample.with_session(id);
        }
        self.record(sample).await;
    }

    /// 记录工具调用耗时（毫秒）
    pub async fn record_tool_call(&self, duration_ms: f64, success: bool, session_id: Option<String>) {
        let mut sample = MetricSample::new(MetricKind::ToolCallDuration, duration_ms)
            .with_timestamp(self.clock.now())
            .with_success(success);
        if let Some(id) = session_id {
            sample = sample.with_session(id);
        }
        self.record(sample).await;
    }

    /// 记录依赖接口响应时间（毫秒）
    pub async fn record_api_response(&self, latency_ms: f64, success: bool) {
        let sample = MetricSample::new(MetricKind::ApiResponseTime, latency_ms)
            .with_timestamp(self.clock.now())
            .with_success(success);
        self.record(sample).await;
    }

    /// 记录一次连接结果
    pub async fn record_connection(&self, success: bool) {
        let value = if success { 1.0 } else { 0.0 };
        let sample = MetricSample::new(MetricKind::ConnectionOutcome, value)
            .with_timestamp(self.clock.now())
            .with_success(success);
        self.record(sample).await;
    }

    /// 记录音频质量评分（0-100）
    pub async fn record_audio_quality(&self, score: f64) {
        let sample = MetricSample::new(MetricKind::AudioQuality, score)
            .with_timestamp(self.clock.now());
        self.record(sample).await;
    }

    /// 查询原始样本，可按类型与起始时间过滤
    pub async fn samples(
        &self,
        kind: Option<&MetricKind>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<MetricSample> {
        let history = self.history.read().await;
        history
            .iter()
            .filter(|s| kind.map_or(true, |k| &s.kind == k))
            .filter(|s| since.map_or(true, |t| s.timestamp >= t))
            .cloned()
            .collect()
    }

    /// 当前样本数量
    pub async fn sample_count(&self) -> usize {
        self.history.read().await.len()
    }

    /// 查询聚合窗口，可按周期标签与起始时间过滤
    pub async fn aggregated_windows(
        &self,
        period: Option<AggregatePeriod>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<AggregatedWindow> {
        let aggregates = self.aggregates.read().await;
        aggregates
            .iter()
            .filter(|w| period.map_or(true, |p| w.period == p))
            .filter(|w| since.map_or(true, |t| w.window_end >= t))
            .cloned()
            .collect()
    }

    /// 执行一次聚合
    ///
    /// 计算覆盖最近一个聚合周期的窗口并追加到聚合队列，
    /// 同时清理超过保留时长的历史窗口。后台任务按周期调用，
    /// 也可手动触发。
    pub async fn aggregate_once(&self) {
        let now = self.clock.now();
        let interval = ChronoDuration::milliseconds(self.config.aggregation_interval.as_millis() as i64);
        let retention = ChronoDuration::milliseconds(self.config.aggregate_retention.as_millis() as i64);
        let window_start = now - interval;

        let samples: Vec<MetricSample> = {
            let history = self.history.read().await;
            history
                .iter()
                .filter(|s| s.timestamp > window_start && s.timestamp <= now)
                .cloned()
                .collect()
        };

        let window = build_window(self.config.period, window_start, now, &samples);
        debug!(samples = window.sample_count, "Aggregation window computed");

        let mut aggregates = self.aggregates.write().await;
        aggregates.push_back(window);

        // 清理超过保留时长的窗口
        let cutoff = now - retention;
        while let Some(front) = aggregates.front() {
            if front.window_end >= cutoff {
                break;
            }
            aggregates.pop_front();
        }
    }

    /// 生成最近一小时的性能摘要
    ///
    /// 直接基于原始样本计算，不依赖后台聚合结果。
    pub async fn performance_summary(&self) -> PerformanceSummary {
        let now = self.clock.now();
        let window_start = now - ChronoDuration::seconds(SUMMARY_WINDOW_SECS);

        let samples: Vec<MetricSample> = {
            let history = self.history.read().await;
            history
                .iter()
                .filter(|s| s.timestamp >= window_start)
                .cloned()
                .collect()
        };

        let window = build_window(self.config.period, window_start, now, &samples);
        PerformanceSummary {
            generated_at: now,
            window_start,
            total_samples: window.sample_count,
            kinds: window.kinds,
            connection: window.connection,
            audio_quality: window.audio_quality,
        }
    }

    /// 启动后台聚合任务
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Metrics collector already running");
                return;
            }
            *running = true;
        }

        info!(
            interval_ms = self.config.aggregation_interval.as_millis() as u64,
            "Metrics collector started"
        );

        let collector = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(collector.config.aggregation_interval);
            // 首个 tick 立即触发，跳过以保证窗口完整
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !*collector.running.read().await {
                    break;
                }
                collector.aggregate_once().await;
            }
            debug!("Metrics aggregation loop exited");
        });
    }

    /// 停止后台聚合任务
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        if !*running {
            return;
        }
        *running = false;
        info!("Metrics collector stopped");
    }

    /// 后台任务是否在运行
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// 对一段样本计算完整聚合窗口
fn build_window(
    period: AggregatePeriod,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    samples: &[MetricSample],
) -> AggregatedWindow {
    let mut grouped: HashMap<MetricKind, Vec<&MetricSample>> = HashMap::new();
    for sample in samples {
        grouped.entry(sample.kind.clone()).or_default().push(sample);
    }

    let mut kinds = HashMap::new();
    for (kind, group) in &grouped {
        // 连接结果与音频质量单独聚合
        if matches!(kind, MetricKind::ConnectionOutcome | MetricKind::AudioQuality) {
            continue;
        }
        kinds.insert(kind.to_string(), aggregate_kind(group));
    }

    AggregatedWindow {
        period,
        window_start,
        window_end,
        sample_count: samples.len(),
        kinds,
        connection: aggregate_connection(samples),
        audio_quality: aggregate_audio(samples),
    }
}

fn aggregate_kind(group: &[&MetricSample]) -> KindAggregate {
    if group.is_empty() {
        return KindAggregate::default();
    }

    let mut values: Vec<f64> = group.iter().map(|s| s.value).collect();
    values.sort_by(f64::total_cmp);

    let count = values.len();
    let successes = group.iter().filter(|s| s.success).count();
    let sum: f64 = values.iter().sum();

    KindAggregate {
        count,
        average: round2(sum / count as f64),
        p50: percentile(&values, 50.0),
        p95: percentile(&values, 95.0),
        p99: percentile(&values, 99.0),
        success_rate: round2(successes as f64 / count as f64 * 100.0),
    }
}

fn aggregate_connection(samples: &[MetricSample]) -> ConnectionAggregate {
    let total = samples
        .iter()
        .filter(|s| s.kind == MetricKind::ConnectionOutcome)
        .count();
    if total == 0 {
        return ConnectionAggregate::default();
    }

    let successes = samples
        .iter()
        .filter(|s| s.kind == MetricKind::ConnectionOutcome && s.success)
        .count();

    ConnectionAggregate {
        total,
        successes,
        success_rate: round2(successes as f64 / total as f64 * 100.0),
    }
}

fn aggregate_audio(samples: &[MetricSample]) -> AudioQualityAggregate {
    let scores: Vec<f64> = samples
        .iter()
        .filter(|s| s.kind == MetricKind::AudioQuality)
        .map(|s| s.value)
        .collect();
    if scores.is_empty() {
        return AudioQualityAggregate::default();
    }

    let count = scores.len();
    let sum: f64 = scores.iter().sum();
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    AudioQualityAggregate {
        count,
        average: round2(sum / count as f64),
        min,
        max,
    }
}
