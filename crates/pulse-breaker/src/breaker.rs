use chrono::{DateTime, Utc};
use pulse_core::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::error::CallError;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// 电路闭合，调用正常通过
    Closed,
    /// 电路打开，调用被直接拒绝
    Open,
    /// 半开，放行有限的探测调用
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 熔断器只读快照
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u64,
    pub success_count: u64,
    pub request_count: u64,
    /// 半开期正在执行的探测调用数
    pub half_open_in_flight: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub state_change_time: DateTime<Utc>,
    pub config: BreakerConfig,
}

/// 内部计数与状态，由互斥锁保护
///
/// 锁内不做任何异步等待，临界区只有纯内存操作。
struct BreakerShared {
    state: BreakerState,
    failure_count: u64,
    success_count: u64,
    request_count: u64,
    half_open_in_flight: u32,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    state_change_time: DateTime<Utc>,
    /// 当前 OPEN 状态的开始时间，非 OPEN 时为 None
    opened_at: Option<DateTime<Utc>>,
    /// 状态代次，每次状态迁移 +1；迟到的完成只更新时间戳
    generation: u64,
    /// OPEN 到期自动进入半开的定时任务
    transition_task: Option<JoinHandle<()>>,
}

/// 半开探测名额守卫
///
/// 调用在等待期间被取消时，Drop 仍会归还名额，
/// 避免半开名额被慢调用永久占用。
struct CallPermit {
    shared: Arc<Mutex<BreakerShared>>,
    generation: u64,
    half_open: bool,
    released: bool,
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.released || !self.half_open {
            return;
        }
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        // 状态已迁移时名额计数已被重置，不再归还
        if shared.generation == self.generation {
            shared.half_open_in_flight = shared.half_open_in_flight.saturating_sub(1);
        }
    }
}

/// 准入被拒绝的原因
enum Rejection {
    Open { retry_after: Duration },
    HalfOpenLimit,
}

/// 命名熔断器
///
/// 包装对单个不可靠依赖的调用：失败率超过阈值后打开电路快速拒绝，
/// 超时后进入半开放行有限探测，探测全部成功则重新闭合。
/// OPEN 到半开既有定时任务驱动，也在准入时按时钟兜底判断，
/// 因此注入手动时钟的测试无需真实等待。
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    shared: Arc<Mutex<BreakerShared>>,
}

impl CircuitBreaker {
    /// 创建使用系统时钟的熔断器
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// 创建使用指定时钟的熔断器
    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            clock,
            shared: Arc::new(Mutex::new(BreakerShared {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                request_count: 0,
                half_open_in_flight: 0,
                last_failure_time: None,
                last_success_time: None,
                state_change_time: now,
                opened_at: None,
                generation: 0,
                transition_task: None,
            })),
        }
    }

    /// 熔断器名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 熔断器配置
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// 当前状态
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// 只读快照
    pub fn metrics(&self) -> BreakerMetrics {
        let shared = self.lock();
        BreakerMetrics {
            name: self.name.clone(),
            state: shared.state,
            failure_count: shared.failure_count,
            success_count: shared.success_count,
            request_count: shared.request_count,
            half_open_in_flight: shared.half_open_in_flight,
            last_failure_time: shared.last_failure_time,
            last_success_time: shared.last_success_time,
            state_change_time: shared.state_change_time,
            config: self.config.clone(),
        }
    }

    /// 经熔断器执行一次调用
    ///
    /// OPEN 状态直接返回 [`CallError::Open`]，半开名额耗尽返回
    /// [`CallError::HalfOpenLimit`]，两者都不会执行 `operation`。
    /// 放行的调用受 `request_timeout` 限制，超时按失败计数并返回
    /// [`CallError::Timeout`]；操作自身的失败原样包装在
    /// [`CallError::Inner`] 中返回。
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.admit() {
            Ok(permit) => permit,
            Err(Rejection::Open { retry_after }) => {
                return Err(CallError::Open {
                    name: self.name.clone(),
                    retry_after,
                });
            }
            Err(Rejection::HalfOpenLimit) => {
                return Err(CallError::HalfOpenLimit {
                    name: self.name.clone(),
                });
            }
        };

        match tokio::time::timeout(self.config.request_timeout, operation()).await {
            Ok(Ok(value)) => {
                self.settle(permit, true);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.settle(permit, false);
                Err(CallError::Inner(err))
            }
            Err(_) => {
                self.settle(permit, false);
                Err(CallError::Timeout {
                    name: self.name.clone(),
                    timeout: self.config.request_timeout,
                })
            }
        }
    }

    /// 强制回到 CLOSED 并清零所有计数器（运维入口）
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut shared = self.lock();

        shared.state = BreakerState::Closed;
        shared.failure_count = 0;
        shared.success_count = 0;
        shared.request_count = 0;
        shared.half_open_in_flight = 0;
        shared.opened_at = None;
        shared.state_change_time = now;
        shared.generation += 1;
        if let Some(task) = shared.transition_task.take() {
            task.abort();
        }

        info!(breaker = %self.name, "Circuit breaker reset");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerShared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 准入判定
    fn admit(&self) -> Result<CallPermit, Rejection> {
        let now = self.clock.now();
        let mut shared = self.lock();

        // OPEN 超时后的首个调用在定时任务之前到达时，按时钟兜底切换
        if shared.state == BreakerState::Open {
            if let Some(opened_at) = shared.opened_at {
                let elapsed = now.signed_duration_since(opened_at).to_std().unwrap_or_default();
                if elapsed >= self.config.timeout {
                    self.enter_half_open(&mut shared, now);
                }
            }
        }

        match shared.state {
            BreakerState::Open => {
                let elapsed = shared
                    .opened_at
                    .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default())
                    .unwrap_or_default();
                let retry_after = self.config.timeout.saturating_sub(elapsed);
                debug!(breaker = %self.name, "Call rejected, circuit open");
                Err(Rejection::Open { retry_after })
            }
            BreakerState::HalfOpen => {
                if shared.half_open_in_flight >= self.config.success_threshold {
                    debug!(breaker = %self.name, "Call rejected, probe budget exhausted");
                    return Err(Rejection::HalfOpenLimit);
                }
                shared.half_open_in_flight += 1;
                Ok(CallPermit {
                    shared: self.shared.clone(),
                    generation: shared.generation,
                    half_open: true,
                    released: false,
                })
            }
            BreakerState::Closed => Ok(CallPermit {
                shared: self.shared.clone(),
                generation: shared.generation,
                half_open: false,
                released: false,
            }),
        }
    }

    /// 按完成顺序记账，并推进状态机
    fn settle(&self, mut permit: CallPermit, success: bool) {
        let now = self.clock.now();
        let mut shared = self.lock();

        if success {
            shared.last_success_time = Some(now);
        } else {
            shared.last_failure_time = Some(now);
        }

        // 准入后发生过状态迁移：计数器已重置，此次完成不再参与计数
        if shared.generation != permit.generation {
            permit.released = true;
            debug!(breaker = %self.name, "Completion after state change, counters untouched");
            return;
        }

        if permit.half_open {
            shared.half_open_in_flight = shared.half_open_in_flight.saturating_sub(1);
        }
        permit.released = true;

        shared.request_count += 1;
        if success {
            shared.success_count += 1;
            shared.failure_count = 0;

            if shared.state == BreakerState::HalfOpen {
                debug!(
                    breaker = %self.name,
                    successes = shared.success_count,
                    "Probe call succeeded"
                );
                if shared.success_count >= self.config.success_threshold as u64
                    && shared.request_count >= self.config.volume_threshold as u64
                {
                    self.close_circuit(&mut shared, now);
                }
            }
        } else {
            shared.failure_count += 1;

            match shared.state {
                BreakerState::Closed => {
                    if shared.failure_count >= self.config.failure_threshold as u64
                        && shared.request_count >= self.config.volume_threshold as u64
                    {
                        self.open_circuit(&mut shared, now);
                    }
                }
                BreakerState::HalfOpen => {
                    // 探测失败立即重新熔断，重新计时
                    warn!(breaker = %self.name, "Probe call failed, reopening circuit");
                    self.open_circuit(&mut shared, now);
                }
                BreakerState::Open => {}
            }
        }
    }

    /// 迁移到 OPEN 并安排到期自动半开
    fn open_circuit(&self, shared: &mut BreakerShared, now: DateTime<Utc>) {
        let failures = shared.failure_count;
        shared.state = BreakerState::Open;
        shared.opened_at = Some(now);
        shared.state_change_time = now;
        shared.success_count = 0;
        shared.half_open_in_flight = 0;
        shared.generation += 1;

        if let Some(task) = shared.transition_task.take() {
            task.abort();
        }

        let generation = shared.generation;
        let shared_arc = self.shared.clone();
        let clock = self.clock.clone();
        let name = self.name.clone();
        let timeout = self.config.timeout;
        shared.transition_task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut shared = shared_arc.lock().unwrap_or_else(|e| e.into_inner());
            if shared.generation == generation && shared.state == BreakerState::Open {
                enter_half_open_locked(&mut shared, &name, clock.now());
            }
        }));

        warn!(
            breaker = %self.name,
            failures,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Circuit breaker opened"
        );
    }

    /// 迁移到 HALF_OPEN，重置探测相关计数
    fn enter_half_open(&self, shared: &mut BreakerShared, now: DateTime<Utc>) {
        enter_half_open_locked(shared, &self.name, now);
    }

    /// 迁移到 CLOSED，清零所有计数器
    fn close_circuit(&self, shared: &mut BreakerShared, now: DateTime<Utc>) {
        shared.state = BreakerState::Closed;
        shared.state_change_time = now;
        shared.opened_at = None;
        shared.failure_count = 0;
        shared.success_count = 0;
        shared.request_count = 0;
        shared.half_open_in_flight = 0;
        shared.generation += 1;
        if let Some(task) = shared.transition_task.take() {
            task.abort();
        }

        info!(breaker = %self.name, "Circuit breaker closed");
    }
}

/// HALF_OPEN 迁移的共用实现，定时任务与准入兜底都会调用
fn enter_half_open_locked(shared: &mut BreakerShared, name: &str, now: DateTime<Utc>) {
    shared.state = BreakerState::HalfOpen;
    shared.state_change_time = now;
    shared.opened_at = None;
    shared.success_count = 0;
    shared.request_count = 0;
    shared.half_open_in_flight = 0;
    shared.generation += 1;
    if let Some(task) = shared.transition_task.take() {
        task.abort();
    }

    info!(breaker = %name, "Circuit breaker half-open, probing recovery");
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        if let Some(task) = self.lock().transition_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn breaker_with_manual_clock(config: BreakerConfig) -> (Arc<CircuitBreaker>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = Arc::new(CircuitBreaker::with_clock("dep", config, clock.clone()));
        (breaker, clock)
    }

    async fn fail_times(breaker: &CircuitBreaker, times: u32) {
        for _ in 0..times {
            let _ = breaker.execute(|| async { Err::<(), &str>("dependency failed") }).await;
        }
    }

    #[tokio::test]
    async fn test_successful_calls_stay_closed() {
        let (breaker, _clock) = breaker_with_manual_clock(BreakerConfig::default());

        for _ in 0..5 {
            let result = breaker.execute(|| async { Ok::<_, &str>(42) }).await;
            assert_eq!(result.unwrap(), 42);
        }

        let metrics = breaker.metrics();
        assert_eq!(metrics.state, BreakerState::Closed);
        assert_eq!(metrics.success_count, 5);
        assert_eq!(metrics.request_count, 5);
        assert_eq!(metrics.failure_count, 0);
        assert!(metrics.last_success_time.is_some());
    }

    #[tokio::test]
    async fn test_opens_at_failure_threshold_with_volume() {
        let config = BreakerConfig::default()
            .with_failure_threshold(3)
            .with_volume_threshold(5);
        let (breaker, _clock) = breaker_with_manual_clock(config);

        // 2 次成功 + 3 次失败：失败数与请求数同时达标
        for _ in 0..2 {
            let _ = breaker.execute(|| async { Ok::<_, &str>(()) }).await;
        }
        fail_times(&breaker, 3).await;

        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_volume_threshold_defers_opening() {
        let config = BreakerConfig::default()
            .with_failure_threshold(3)
            .with_volume_threshold(10);
        let (breaker, _clock) = breaker_with_manual_clock(config);

        // 失败数达标但请求数不足，不触发熔断
        fail_times(&breaker, 3).await;

        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.metrics().failure_count, 3);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let config = BreakerConfig::default()
            .with_failure_threshold(2)
            .with_volume_threshold(2);
        let (breaker, _clock) = breaker_with_manual_clock(config);
        fail_times(&breaker, 2).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = invocations.clone();
        let result = breaker
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        // 拒绝时操作不会被执行
        match result {
            Err(CallError::Open { retry_after, .. }) => {
                assert!(retry_after <= BreakerConfig::default().timeout);
            }
            other => panic!("expected CallError::Open, got {:?}", other),
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_via_clock() {
        let config = BreakerConfig::default()
            .with_failure_threshold(2)
            .with_volume_threshold(2)
            .with_timeout(Duration::from_secs(30));
        let (breaker, clock) = breaker_with_manual_clock(config);
        fail_times(&breaker, 2).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        // 未到期，仍然拒绝
        clock.advance_secs(10);
        let result = breaker.execute(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CallError::Open { .. })));

        // 到期后的首个调用作为探测放行
        clock.advance_secs(25);
        let result = breaker.execute(|| async { Ok::<_, &str>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn test_timer_driven_half_open() {
        let config = BreakerConfig::default()
            .with_failure_threshold(1)
            .with_volume_threshold(1)
            .with_timeout(Duration::from_millis(80));
        let breaker = CircuitBreaker::new("dep", config);

        fail_times(&breaker, 1).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        // 不发起任何调用，定时任务独立完成切换
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_probe_budget_and_close() {
        let config = BreakerConfig::default()
            .with_failure_threshold(2)
            .with_volume_threshold(2)
            .with_success_threshold(2)
            .with_timeout(Duration::from_secs(5));
        let (breaker, clock) = breaker_with_manual_clock(config);
        fail_times(&breaker, 2).await;
        clock.advance_secs(6);

        // 两个探测调用挂起，占满名额
        let (tx1, rx1) = oneshot::channel::<()>();
        let (tx2, rx2) = oneshot::channel::<()>();
        let b1 = breaker.clone();
        let h1 = tokio::spawn(async move {
            b1.execute(|| async move {
                rx1.await.map_err(|_| "dropped")?;
                Ok::<_, &str>(1)
            })
            .await
        });
        let b2 = breaker.clone();
        let h2 = tokio::spawn(async move {
            b2.execute(|| async move {
                rx2.await.map_err(|_| "dropped")?;
                Ok::<_, &str>(2)
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // 名额耗尽，第三个调用立即失败
        let result = breaker.execute(|| async { Ok::<_, &str>(3) }).await;
        assert!(matches!(result, Err(CallError::HalfOpenLimit { .. })));

        // 两个探测都成功后电路闭合
        tx1.send(()).ok();
        tx2.send(()).ok();
        assert!(h1.await.unwrap().is_ok());
        assert!(h2.await.unwrap().is_ok());

        let metrics = breaker.metrics();
        assert_eq!(metrics.state, BreakerState::Closed);
        // 闭合时所有计数器清零
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.success_count, 0);
        assert_eq!(metrics.request_count, 0);
        assert_eq!(metrics.half_open_in_flight, 0);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let config = BreakerConfig::default()
            .with_failure_threshold(2)
            .with_volume_threshold(2)
            .with_timeout(Duration::from_secs(5));
        let (breaker, clock) = breaker_with_manual_clock(config);
        fail_times(&breaker, 2).await;

        clock.advance_secs(6);
        let result = breaker.execute(|| async { Err::<(), &str>("still failing") }).await;
        assert!(matches!(result, Err(CallError::Inner("still failing"))));

        // 探测失败立即回到 OPEN，并重新计时
        assert_eq!(breaker.state(), BreakerState::Open);
        let result = breaker.execute(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CallError::Open { .. })));

        // 再次到期后允许新一轮探测
        clock.advance_secs(6);
        let result = breaker.execute(|| async { Ok::<_, &str>(9) }).await;
        assert_eq!(result.unwrap(), 9);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn test_request_timeout_counts_as_failure() {
        let config = BreakerConfig::default()
            .with_failure_threshold(1)
            .with_volume_threshold(1)
            .with_request_timeout(Duration::from_millis(50));
        let (breaker, _clock) = breaker_with_manual_clock(config);

        let result = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, &str>(())
            })
            .await;

        match result {
            Err(err) => assert!(err.is_timeout()),
            Ok(_) => panic!("expected timeout"),
        }
        // 超时按失败计数并触发熔断
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.metrics().last_failure_time.is_some());
    }

    #[tokio::test]
    async fn test_inner_error_passthrough() {
        let (breaker, _clock) = breaker_with_manual_clock(BreakerConfig::default());

        let result = breaker.execute(|| async { Err::<(), String>("boom".to_string()) }).await;

        match result {
            Err(CallError::Inner(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected inner error, got {:?}", other),
        }
        assert_eq!(breaker.metrics().failure_count, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let config = BreakerConfig::default()
            .with_failure_threshold(3)
            .with_volume_threshold(1);
        let (breaker, _clock) = breaker_with_manual_clock(config);

        fail_times(&breaker, 2).await;
        assert_eq!(breaker.metrics().failure_count, 2);

        // 一次成功清零失败计数
        let _ = breaker.execute(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(breaker.metrics().failure_count, 0);

        fail_times(&breaker, 2).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_probe_releases_budget() {
        let config = BreakerConfig::default()
            .with_failure_threshold(1)
            .with_volume_threshold(1)
            .with_success_threshold(1)
            .with_timeout(Duration::from_secs(5));
        let (breaker, clock) = breaker_with_manual_clock(config);
        fail_times(&breaker, 1).await;
        clock.advance_secs(6);

        // 探测调用被取消
        let b = breaker.clone();
        let handle = tokio::spawn(async move {
            b.execute(|| async {
                std::future::pending::<Result<i32, &str>>().await
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        handle.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 名额被归还，新的探测可以进入并闭合电路
        let result = breaker.execute(|| async { Ok::<_, &str>(5) }).await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_reset() {
        let config = BreakerConfig::default()
            .with_failure_threshold(1)
            .with_volume_threshold(1);
        let (breaker, _clock) = breaker_with_manual_clock(config);
        fail_times(&breaker, 1).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.reset();

        let metrics = breaker.metrics();
        assert_eq!(metrics.state, BreakerState::Closed);
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.request_count, 0);

        let result = breaker.execute(|| async { Ok::<_, &str>(1) }).await;
        assert!(result.is_ok());
    }
}
