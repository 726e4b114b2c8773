use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

use pulse_alert::{Alert, AlertManager, AlertRule, AlertStats, RuleContext};
use pulse_breaker::{BreakerConfig, BreakerMetrics, BreakerRegistry, BreakerState, CallError};
use pulse_config::PulseConfig;
use pulse_core::{Clock, PulseError, SystemClock};
use pulse_metrics::{
    AggregatePeriod, AggregatedWindow, CollectorConfig, MetricKind, MetricSample,
    MetricsCollector, PerformanceSummary,
};
use pulse_slo::{ComplianceReport, SloDefinition, SloStatus, SloTracker};

/// [`PulseRuntime`] 构建器
///
/// 缺省使用系统时钟与各组件的默认配置。
pub struct PulseRuntimeBuilder {
    clock: Arc<dyn Clock>,
    breaker_defaults: BreakerConfig,
    collector_config: CollectorConfig,
    slos: Vec<SloDefinition>,
    max_alert_history: Option<usize>,
    evaluation_interval: Duration,
    alert_retention: Duration,
}

impl Default for PulseRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            breaker_defaults: BreakerConfig::default(),
            collector_config: CollectorConfig::default(),
            slos: Vec::new(),
            max_alert_history: None,
            evaluation_interval: Duration::from_secs(30),
            alert_retention: Duration::from_secs(24 * 3600),
        }
    }

    /// 注入时钟，所有组件共享同一实例
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 设置新建熔断器使用的默认配置
    pub fn with_breaker_defaults(mut self, config: BreakerConfig) -> Self {
        self.breaker_defaults = config;
        self
    }

    /// 设置指标收集器配置
    pub fn with_collector_config(mut self, config: CollectorConfig) -> Self {
        self.collector_config = config;
        self
    }

    /// 预注册一个 SLO 目标
    pub fn with_slo(mut self, definition: SloDefinition) -> Self {
        self.slos.push(definition);
        self
    }

    /// 设置告警历史容量
    pub fn with_max_alert_history(mut self, max_history: usize) -> Self {
        self.max_alert_history = Some(max_history);
        self
    }

    /// 设置告警规则的评估周期
    pub fn with_evaluation_interval(mut self, interval: Duration) -> Self {
        self.evaluation_interval = interval;
        self
    }

    /// 设置已解决告警的保留时长
    pub fn with_alert_retention(mut self, retention: Duration) -> Self {
        self.alert_retention = retention;
        self
    }

    /// 校验配置、注册预设 SLO 并组装运行时
    pub async fn build(self) -> pulse_core::Result<PulseRuntime> {
        let PulseRuntimeBuilder {
            clock,
            breaker_defaults,
            collector_config,
            slos,
            max_alert_history,
            evaluation_interval,
            alert_retention,
        } = self;

        breaker_defaults.validate()?;
        collector_config.validate()?;
        if evaluation_interval.is_zero() {
            return Err(PulseError::config(
                "evaluation interval must be greater than zero",
            ));
        }

        let breakers = Arc::new(BreakerRegistry::with_clock(breaker_defaults, clock.clone()));
        let metrics = Arc::new(MetricsCollector::with_clock(collector_config, clock.clone()));

        let tracker = SloTracker::with_clock(clock.clone());
        for definition in slos {
            tracker.register(definition).await?;
        }

        let mut alerts = AlertManager::with_clock(clock.clone());
        if let Some(capacity) = max_alert_history {
            alerts = alerts.with_max_history(capacity);
        }

        Ok(PulseRuntime {
            clock,
            breakers,
            metrics,
            slos: Arc::new(tracker),
            alerts: Arc::new(alerts),
            evaluation_interval,
            alert_retention,
            running: Arc::new(RwLock::new(false)),
        })
    }
}

/// 运行时装配根
///
/// 持有熔断器注册表、指标收集器、SLO 跟踪器与告警管理器的
/// 共享实例：依赖调用经由 [`call`](PulseRuntime::call) 执行并
/// 自动记录结果，后台任务周期性评估告警规则并清理过期告警。
/// 进程内不使用全局单例，组件都经由本类型显式传递。
#[derive(Clone)]
pub struct PulseRuntime {
    clock: Arc<dyn Clock>,
    breakers: Arc<BreakerRegistry>,
    metrics: Arc<MetricsCollector>,
    slos: Arc<SloTracker>,
    alerts: Arc<AlertManager>,
    evaluation_interval: Duration,
    alert_retention: Duration,
    running: Arc<RwLock<bool>>,
}

impl PulseRuntime {
    /// 创建构建器
    pub fn builder() -> PulseRuntimeBuilder {
        PulseRuntimeBuilder::new()
    }

    /// 按全局配置组装运行时
    ///
    /// 把配置文件中的 `[breaker]`、`[metrics]`、`[[slo]]` 与
    /// `[alert]` 段映射到各组件配置上。
    pub async fn from_config(config: &PulseConfig) -> pulse_core::Result<Self> {
        let breaker_defaults = BreakerConfig::default()
            .with_failure_threshold(config.breaker.failure_threshold)
            .with_timeout(Duration::from_millis(config.breaker.timeout_ms))
            .with_success_threshold(config.breaker.success_threshold)
            .with_request_timeout(Duration::from_millis(config.breaker.request_timeout_ms))
            .with_volume_threshold(config.breaker.volume_threshold);

        let collector_config = CollectorConfig::default()
            .with_history_capacity(config.metrics.history_capacity)
            .with_aggregation_interval(Duration::from_millis(
                config.metrics.aggregation_interval_ms,
            ))
            .with_aggregate_retention(Duration::from_secs(
                config.metrics.aggregate_retention_hours * 3600,
            ));

        let mut builder = Self::builder()
            .with_breaker_defaults(breaker_defaults)
            .with_collector_config(collector_config)
            .with_max_alert_history(config.alert.max_history)
            .with_evaluation_interval(Duration::from_millis(config.alert.evaluation_interval_ms))
            .with_alert_retention(Duration::from_secs(config.alert.retention_hours * 3600));

        for target in &config.slo {
            builder = builder.with_slo(
                SloDefinition::new(&target.name, target.target)
                    .with_window(Duration::from_secs(target.window_secs))
                    .with_burn_rate_threshold(target.burn_rate_threshold),
            );
        }

        builder.build().await
    }

    /// 熔断器注册表
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// 指标收集器
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// SLO 跟踪器
    pub fn slos(&self) -> &SloTracker {
        &self.slos
    }

    /// 告警管理器
    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    /// 经由命名熔断器执行一次依赖调用并记录结果
    ///
    /// 调用耗时与成败作为 `kind` 样本写入指标收集器；给出 `slo`
    /// 名称时同步写入对应 SLO。熔断器直接拒绝（OPEN 或探测额度
    /// 用尽）时依赖并未被真正调用：只记一条失败的连接结果样本，
    /// 不计入 SLO。
    pub async fn call<F, Fut, T, E>(
        &self,
        dependency: &str,
        slo: Option<&str>,
        kind: MetricKind,
        operation: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.breakers.get_or_create(dependency).await;

        let started = Instant::now();
        let result = breaker.execute(operation).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(_) => {
                let sample =
                    MetricSample::new(kind, elapsed_ms).with_timestamp(self.clock.now());
                self.metrics.record(sample).await;
                if let Some(name) = slo {
                    self.slos.record(name, true).await;
                }
            }
            Err(error) if error.is_rejection() => {
                // 依赖未被调用，不计入 SLO
                debug!(dependency = %dependency, "Call rejected by circuit breaker");
                self.metrics.record_connection(false).await;
            }
            Err(_) => {
                let sample = MetricSample::new(kind, elapsed_ms)
                    .with_success(false)
                    .with_timestamp(self.clock.now());
                self.metrics.record(sample).await;
                if let Some(name) = slo {
                    self.slos.record(name, false).await;
                }
            }
        }

        result
    }

    /// 执行一轮告警规则评估
    ///
    /// 把当前熔断器快照与 SLO 状态折叠成规则上下文，逐条提供给
    /// 类别匹配的启用规则，返回本轮新产生的告警。
    pub async fn evaluate_alerts(&self) -> Vec<Alert> {
        let mut contexts = Vec::new();

        for snapshot in self.breakers.all_metrics().await {
            contexts.push(RuleContext::CircuitBreaker {
                state: snapshot.state.to_string(),
                name: snapshot.name,
                failure_count: snapshot.failure_count,
                request_count: snapshot.request_count,
            });
        }

        for status in self.slos.all_statuses().await {
            contexts.push(RuleContext::Slo {
                health: status.health.to_string(),
                name: status.name,
                current: status.current,
                error_budget: status.error_budget,
                burn_rate: status.burn_rate,
            });
        }

        let mut fired = Vec::new();
        for rule in self.alerts.rules().await {
            if !rule.enabled {
                continue;
            }
            for context in contexts.iter().filter(|c| rule.matches(c)) {
                if let Some(alert) = self.alerts.create_alert(&rule.id, context, None).await {
                    fired.push(alert);
                }
            }
        }

        if !fired.is_empty() {
            info!(count = fired.len(), "Alert rules fired");
        }
        fired
    }

    /// 启动后台任务
    ///
    /// 开启指标聚合循环与规则评估循环。评估循环每个周期跑一轮
    /// 规则评估，并清理超过保留时长的已解决告警。重复调用只
    /// 告警不重启。
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            warn!("Pulse runtime is already running");
            return;
        }
        *running = true;
        drop(running);

        self.metrics.start().await;

        info!(
            evaluation_interval = ?self.evaluation_interval,
            alert_retention = ?self.alert_retention,
            "Pulse runtime started"
        );

        let runtime = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(runtime.evaluation_interval);
            // interval 的首个 tick 立即完成，跳过
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let is_running = *runtime.running.read().await;
                if !is_running {
                    info!("Alert evaluation loop stopped");
                    break;
                }

                runtime.evaluate_alerts().await;

                let purged = runtime.alerts.clear_old(runtime.alert_retention).await;
                if purged > 0 {
                    debug!(purged = purged, "Removed resolved alerts past retention");
                }
            }
        });
    }

    /// 是否正在运行
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 停止后台任务
    ///
    /// 幂等，重复调用是无操作。已在途的依赖调用不受影响。
    pub async fn shutdown(&self) {
        let mut running = self.running.write().await;
        if !*running {
            return;
        }
        *running = false;
        drop(running);

        self.metrics.stop().await;
        info!("Pulse runtime stopped");
    }

    /// 管理操作：复位全部熔断器，同时取消挂起的恢复定时器
    pub async fn reset_breakers(&self) {
        self.breakers.reset_all().await;
    }

    /// 单个熔断器的快照
    pub async fn breaker_metrics(&self, name: &str) -> Option<BreakerMetrics> {
        Some(self.breakers.get(name).await?.metrics())
    }

    /// 全部熔断器快照，按名称排序
    pub async fn all_breaker_metrics(&self) -> Vec<BreakerMetrics> {
        self.breakers.all_metrics().await
    }

    /// 单个熔断器的当前状态
    pub async fn breaker_state(&self, name: &str) -> Option<BreakerState> {
        Some(self.breakers.get(name).await?.state())
    }

    /// 复位单个熔断器，未注册时返回 false
    pub async fn reset_breaker(&self, name: &str) -> bool {
        self.breakers.reset(name).await
    }

    /// 查询原始指标样本，可按类型与起始时间过滤
    pub async fn samples(
        &self,
        kind: Option<&MetricKind>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<MetricSample> {
        self.metrics.samples(kind, since).await
    }

    /// 查询聚合窗口，可按周期标签与起始时间过滤
    pub async fn aggregated(
        &self,
        period: Option<AggregatePeriod>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<AggregatedWindow> {
        self.metrics.aggregated_windows(period, since).await
    }

    /// 最近一小时的性能摘要
    pub async fn performance_summary(&self) -> PerformanceSummary {
        self.metrics.performance_summary().await
    }

    /// 注册 SLO 目标
    pub async fn register_slo(&self, definition: SloDefinition) -> pulse_core::Result<()> {
        self.slos.register(definition).await
    }

    /// 记录一次 SLO 采样
    pub async fn record_slo(&self, name: &str, success: bool) {
        self.slos.record(name, success).await
    }

    /// 单个 SLO 的当前状态
    pub async fn slo_status(&self, name: &str) -> Option<SloStatus> {
        self.slos.status(name).await
    }

    /// 全部 SLO 状态，按名称排序
    pub async fn all_slo_statuses(&self) -> Vec<SloStatus> {
        self.slos.all_statuses().await
    }

    /// 全局 SLO 合规报告
    pub async fn compliance_report(&self) -> ComplianceReport {
        self.slos.compliance_report().await
    }

    /// 注册告警规则
    pub async fn add_rule(&self, rule: AlertRule) {
        self.alerts.add_rule(rule).await
    }

    /// 启用规则，未注册时返回 false
    pub async fn enable_rule(&self, rule_id: &str) -> bool {
        self.alerts.enable_rule(rule_id).await
    }

    /// 停用规则，未注册时返回 false
    pub async fn disable_rule(&self, rule_id: &str) -> bool {
        self.alerts.disable_rule(rule_id).await
    }

    /// 当前未解决的告警
    pub async fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.active_alerts().await
    }

    /// 告警统计
    pub async fn alert_stats(&self) -> AlertStats {
        self.alerts.stats().await
    }

    /// 清理已解决且超过保留时长的告警，返回清理数量
    pub async fn clear_old_alerts(&self, older_than: Duration) -> usize {
        self.alerts.clear_old(older_than).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_alert::{AlertSeverity, RuleCategory};
    use pulse_config::SloTarget;
    use pulse_core::ManualClock;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_builder_defaults() {
        let runtime = PulseRuntime::builder().build().await.unwrap();

        assert!(!runtime.is_running().await);
        assert!(runtime.all_breaker_metrics().await.is_empty());
        assert_eq!(runtime.metrics().sample_count().await, 0);
        assert!(runtime.all_slo_statuses().await.is_empty());
        assert_eq!(runtime.alert_stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_build_rejects_zero_evaluation_interval() {
        let result = PulseRuntime::builder()
            .with_evaluation_interval(Duration::ZERO)
            .build()
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_call_records_success() {
        let runtime = PulseRuntime::builder()
            .with_slo(SloDefinition::new("api-availability", 99.0))
            .build()
            .await
            .unwrap();

        let result = runtime
            .call(
                "payments",
                Some("api-availability"),
                MetricKind::ApiResponseTime,
                || async { Ok::<_, String>(42) },
            )
            .await;
        assert_eq!(result.unwrap(), 42);

        // 延迟样本与 SLO 采样都已记录
        let samples = runtime
            .samples(Some(&MetricKind::ApiResponseTime), None)
            .await;
        assert_eq!(samples.len(), 1);
        assert!(samples[0].success);

        let status = runtime.slo_status("api-availability").await.unwrap();
        assert_eq!(status.total_samples, 1);
        assert_eq!(status.current, 100.0);

        assert_eq!(
            runtime.breaker_state("payments").await,
            Some(BreakerState::Closed)
        );
    }

    #[tokio::test]
    async fn test_call_records_failure() {
        let runtime = PulseRuntime::builder()
            .with_slo(SloDefinition::new("api-availability", 99.0))
            .build()
            .await
            .unwrap();

        let result: Result<i32, _> = runtime
            .call(
                "payments",
                Some("api-availability"),
                MetricKind::ApiResponseTime,
                || async { Err::<i32, String>("boom".to_string()) },
            )
            .await;
        assert!(matches!(result, Err(CallError::Inner(_))));

        let samples = runtime
            .samples(Some(&MetricKind::ApiResponseTime), None)
            .await;
        assert_eq!(samples.len(), 1);
        assert!(!samples[0].success);

        let status = runtime.slo_status("api-availability").await.unwrap();
        assert_eq!(status.failed_samples, 1);
    }

    #[tokio::test]
    async fn test_rejected_call_skips_slo() {
        let breaker_config = BreakerConfig::default()
            .with_failure_threshold(1)
            .with_volume_threshold(1)
            .with_timeout(Duration::from_secs(60));
        let runtime = PulseRuntime::builder()
            .with_breaker_defaults(breaker_config)
            .with_slo(SloDefinition::new("api-availability", 99.0))
            .build()
            .await
            .unwrap();

        // 第一次失败即触发熔断
        let _ = runtime
            .call(
                "payments",
                Some("api-availability"),
                MetricKind::ApiResponseTime,
                || async { Err::<i32, String>("boom".to_string()) },
            )
            .await;
        assert_eq!(
            runtime.breaker_state("payments").await,
            Some(BreakerState::Open)
        );

        // 熔断期间的调用被直接拒绝
        let rejected = runtime
            .call(
                "payments",
                Some("api-availability"),
                MetricKind::ApiResponseTime,
                || async { Ok::<_, String>(1) },
            )
            .await;
        assert!(matches!(rejected, Err(ref e) if e.is_rejection()));

        // 拒绝只产生一条失败的连接样本，不计入 SLO
        let connections = runtime
            .samples(Some(&MetricKind::ConnectionOutcome), None)
            .await;
        assert_eq!(connections.len(), 1);
        assert!(!connections[0].success);

        let status = runtime.slo_status("api-availability").await.unwrap();
        assert_eq!(status.total_samples, 1);
    }

    #[tokio::test]
    async fn test_evaluate_alerts_on_open_breaker() {
        let breaker_config = BreakerConfig::default()
            .with_failure_threshold(1)
            .with_volume_threshold(1)
            .with_timeout(Duration::from_secs(60));
        let runtime = PulseRuntime::builder()
            .with_breaker_defaults(breaker_config)
            .build()
            .await
            .unwrap();

        runtime
            .add_rule(AlertRule::new(
                "breaker_open",
                "Circuit breaker open",
                AlertSeverity::Critical,
                "resilience",
                RuleCategory::CircuitBreaker,
                |context| match context {
                    RuleContext::CircuitBreaker { state, .. } => Ok(state == "open"),
                    _ => Ok(false),
                },
            ))
            .await;

        // 熔断器闭合时不触发
        runtime.breakers().get_or_create("payments").await;
        assert!(runtime.evaluate_alerts().await.is_empty());

        let _ = runtime
            .call("payments", None, MetricKind::ApiResponseTime, || async {
                Err::<i32, String>("boom".to_string())
            })
            .await;

        let fired = runtime.evaluate_alerts().await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].severity, AlertSeverity::Critical);

        // 节流窗口内重复评估不再触发
        assert!(runtime.evaluate_alerts().await.is_empty());
        assert_eq!(runtime.alert_stats().await.total, 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let runtime = PulseRuntime::builder()
            .with_evaluation_interval(Duration::from_millis(50))
            .with_slo(SloDefinition::new("api-availability", 99.0))
            .build()
            .await
            .unwrap();

        runtime
            .add_rule(AlertRule::new(
                "slo_critical",
                "SLO critical",
                AlertSeverity::Error,
                "slo",
                RuleCategory::Slo,
                |context| match context {
                    RuleContext::Slo { health, .. } => Ok(health == "critical"),
                    _ => Ok(false),
                },
            ))
            .await;

        runtime.start().await;
        assert!(runtime.is_running().await);
        assert!(runtime.metrics().is_running().await);

        // 把 SLO 打到 critical，等待评估循环跑过至少一轮
        for _ in 0..5 {
            runtime.record_slo("api-availability", false).await;
        }
        sleep(Duration::from_millis(160)).await;
        assert!(!runtime.active_alerts().await.is_empty());

        runtime.shutdown().await;
        assert!(!runtime.is_running().await);
        assert!(!runtime.metrics().is_running().await);

        // 幂等
        runtime.shutdown().await;
        assert!(!runtime.is_running().await);
    }

    #[tokio::test]
    async fn test_from_config() {
        let mut config = PulseConfig::default();
        config.breaker.failure_threshold = 2;
        config.slo.push(SloTarget {
            name: "chat-availability".to_string(),
            target: 99.5,
            window_secs: 600,
            burn_rate_threshold: 3.0,
        });

        let runtime = PulseRuntime::from_config(&config).await.unwrap();

        let status = runtime.slo_status("chat-availability").await.unwrap();
        assert_eq!(status.target, 99.5);

        let breaker = runtime.breakers().get_or_create("db").await;
        assert_eq!(breaker.metrics().config.failure_threshold, 2);
    }

    #[tokio::test]
    async fn test_reset_breakers() {
        let breaker_config = BreakerConfig::default()
            .with_failure_threshold(1)
            .with_volume_threshold(1)
            .with_timeout(Duration::from_secs(60));
        let runtime = PulseRuntime::builder()
            .with_breaker_defaults(breaker_config)
            .build()
            .await
            .unwrap();

        let _ = runtime
            .call("payments", None, MetricKind::ApiResponseTime, || async {
                Err::<i32, String>("boom".to_string())
            })
            .await;
        assert_eq!(
            runtime.breaker_state("payments").await,
            Some(BreakerState::Open)
        );

        runtime.reset_breakers().await;
        assert_eq!(
            runtime.breaker_state("payments").await,
            Some(BreakerState::Closed)
        );
    }

    #[tokio::test]
    async fn test_shared_manual_clock() {
        let clock = Arc::new(ManualClock::starting_now());
        let runtime = PulseRuntime::builder()
            .with_clock(clock.clone())
            .with_slo(
                SloDefinition::new("api-availability", 99.0)
                    .with_window(Duration::from_secs(60)),
            )
            .build()
            .await
            .unwrap();

        runtime.record_slo("api-availability", false).await;
        let status = runtime.slo_status("api-availability").await.unwrap();
        assert_eq!(status.failed_samples, 1);

        // 时钟推出测量窗口后样本清退，回到乐观默认
        clock.advance_secs(120);
        let status = runtime.slo_status("api-availability").await.unwrap();
        assert_eq!(status.total_samples, 0);
        assert_eq!(status.current, 100.0);
    }
}
