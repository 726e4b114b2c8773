use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pulse_core::{round2, Clock, SystemClock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::model::{ComplianceReport, SloDefinition, SloHealth, SloSample, SloStatus};

/// 单个 SLO 的定义与窗口内样本
struct SloEntry {
    definition: SloDefinition,
    samples: VecDeque<SloSample>,
}

/// SLO 跟踪器
///
/// 按名称管理多个 SLO，记录成功/失败采样并计算达成率、
/// 剩余错误预算与燃烧率。样本在写入时按测量窗口裁剪，
/// 读取时只统计窗口内的样本。
#[derive(Clone)]
pub struct SloTracker {
    slos: Arc<RwLock<HashMap<String, SloEntry>>>,
    clock: Arc<dyn Clock>,
}

impl SloTracker {
    /// 创建使用系统时钟的跟踪器
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// 创建使用指定时钟的跟踪器
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slos: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// 注册一个 SLO
    ///
    /// 重复注册同名 SLO 会替换定义并清空已有样本。
    pub async fn register(&self, definition: SloDefinition) -> pulse_core::Result<()> {
        definition.validate()?;

        let mut slos = self.slos.write().await;
        let name = definition.name.clone();
        if slos.contains_key(&name) {
            warn!(slo = %name, "SLO redefined, existing samples dropped");
        } else {
            info!(slo = %name, target = definition.target, "SLO registered");
        }
        slos.insert(
            name,
            SloEntry {
                definition,
                samples: VecDeque::new(),
            },
        );
        Ok(())
    }

    /// 已注册的 SLO 定义列表
    pub async fn definitions(&self) -> Vec<SloDefinition> {
        self.slos.read().await.values().map(|e| e.definition.clone()).collect()
    }

    /// 是否存在指定名称的 SLO
    pub async fn contains(&self, name: &str) -> bool {
        self.slos.read().await.contains_key(name)
    }

    /// 指定 SLO 当前窗口内的样本数
    pub async fn sample_count(&self, name: &str) -> Option<usize> {
        self.slos.read().await.get(name).map(|e| e.samples.len())
    }

    /// 记录一次采样，时间取当前时钟
    pub async fn record(&self, name: &str, success: bool) {
        let now = self.clock.now();
        self.record_at(name, success, now).await;
    }

    /// 按指定时间记录一次采样
    ///
    /// 未注册的名称只告警不报错，便于上游在配置漂移时保持运行。
    pub async fn record_at(&self, name: &str, success: bool, timestamp: DateTime<Utc>) {
        let now = self.clock.now();
        let mut slos = self.slos.write().await;

        let Some(entry) = slos.get_mut(name) else {
            warn!(slo = %name, "Sample recorded against unknown SLO, ignored");
            return;
        };

        entry.samples.push_back(SloSample { timestamp, success });

        // 裁剪测量窗口之外的旧样本
        let window = ChronoDuration::milliseconds(entry.definition.window.as_millis() as i64);
        let cutoff = now - window;
        while let Some(front) = entry.samples.front() {
            if front.timestamp >= cutoff {
                break;
            }
            entry.samples.pop_front();
        }

        debug!(slo = %name, success, samples = entry.samples.len(), "SLO sample recorded");
    }

    /// 查询单个 SLO 的状态
    pub async fn status(&self, name: &str) -> Option<SloStatus> {
        let now = self.clock.now();
        let slos = self.slos.read().await;
        slos.get(name).map(|entry| compute_status(entry, now))
    }

    /// 查询全部 SLO 的状态
    pub async fn all_statuses(&self) -> Vec<SloStatus> {
        let now = self.clock.now();
        let slos = self.slos.read().await;
        let mut statuses: Vec<SloStatus> =
            slos.values().map(|entry| compute_status(entry, now)).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// 生成全局合规报告
    pub async fn compliance_report(&self) -> ComplianceReport {
        let statuses = self.all_statuses().await;

        let healthy = statuses.iter().filter(|s| s.health == SloHealth::Healthy).count();
        let warning = statuses.iter().filter(|s| s.health == SloHealth::Warning).count();
        let critical = statuses.iter().filter(|s| s.health == SloHealth::Critical).count();

        let overall = if critical > 0 {
            SloHealth::Critical
        } else if warning > 0 {
            SloHealth::Warning
        } else {
            SloHealth::Healthy
        };

        ComplianceReport {
            overall,
            healthy,
            warning,
            critical,
            slos: statuses,
            generated_at: self.clock.now(),
        }
    }
}

impl Default for SloTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// 基于窗口内样本计算 SLO 状态
fn compute_status(entry: &SloEntry, now: DateTime<Utc>) -> SloStatus {
    let def = &entry.definition;
    let window = ChronoDuration::milliseconds(def.window.as_millis() as i64);
    let cutoff = now - window;

    let total = entry.samples.iter().filter(|s| s.timestamp >= cutoff).count();
    let failed = entry
        .samples
        .iter()
        .filter(|s| s.timestamp >= cutoff && !s.success)
        .count();

    // 无样本时取乐观默认，避免无流量期间误报
    if total == 0 {
        return SloStatus {
            name: def.name.clone(),
            target: def.target,
            current: 100.0,
            error_budget: 100.0,
            burn_rate: 0.0,
            health: SloHealth::Healthy,
            total_samples: 0,
            failed_samples: 0,
            generated_at: now,
        };
    }

    let current = round2((total - failed) as f64 / total as f64 * 100.0);
    let error_budget = round2((def.target - current).max(0.0));

    let actual_error_rate = failed as f64 / total as f64;
    let target_error_rate = (100.0 - def.target) / 100.0;
    // 目标为 100% 时没有可消耗的预算：出现任何失败即视为无穷燃烧
    let burn_rate = if target_error_rate <= 0.0 {
        if failed == 0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        actual_error_rate / target_error_rate
    };

    let health = if burn_rate > def.burn_rate_threshold {
        SloHealth::Critical
    } else if burn_rate > def.burn_rate_threshold / 2.0 {
        SloHealth::Warning
    } else {
        SloHealth::Healthy
    };

    SloStatus {
        name: def.name.clone(),
        target: def.target,
        current,
        error_budget,
        burn_rate,
        health,
        total_samples: total,
        failed_samples: failed,
        generated_at: now,
    }
}
