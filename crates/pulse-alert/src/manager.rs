use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pulse_core::{Clock, SystemClock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::model::{Alert, AlertSeverity, AlertStats};
use crate::rule::{AlertRule, RuleContext};

/// 告警历史默认容量
const DEFAULT_MAX_HISTORY: usize = 10_000;

/// 告警管理器
///
/// 维护规则表与有界告警历史。`create_alert` 按固定顺序执行：
/// 规则存在且启用 → 节流检查 → 类别匹配 → 条件求值 → 落盘并记录
/// 触发时间。节流检查在条件求值之前，被节流的调用不会执行条件；
/// 条件返回 false 或报错都不消耗节流窗口。
#[derive(Clone)]
pub struct AlertManager {
    rules: Arc<RwLock<HashMap<String, AlertRule>>>,
    alerts: Arc<RwLock<VecDeque<Alert>>>,
    last_fired: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    max_history: usize,
    clock: Arc<dyn Clock>,
}

impl AlertManager {
    /// 创建使用系统时钟的管理器
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// 创建使用指定时钟的管理器
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rules: Arc::new(RwLock::new(HashMap::new())),
            alerts: Arc::new(RwLock::new(VecDeque::new())),
            last_fired: Arc::new(RwLock::new(HashMap::new())),
            max_history: DEFAULT_MAX_HISTORY,
            clock,
        }
    }

    /// 设置告警历史容量
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// 添加或替换规则
    pub async fn add_rule(&self, rule: AlertRule) {
        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.id) {
            warn!(rule_id = %rule.id, "Alert rule replaced");
        } else {
            info!(rule_id = %rule.id, severity = %rule.severity, "Alert rule added");
        }
        rules.insert(rule.id.clone(), rule);
    }

    /// 移除规则，返回是否存在
    pub async fn remove_rule(&self, rule_id: &str) -> bool {
        let removed = self.rules.write().await.remove(rule_id).is_some();
        if removed {
            info!(rule_id = %rule_id, "Alert rule removed");
        }
        removed
    }

    /// 启用规则，返回是否存在
    pub async fn enable_rule(&self, rule_id: &str) -> bool {
        self.set_rule_enabled(rule_id, true).await
    }

    /// 停用规则，返回是否存在
    pub async fn disable_rule(&self, rule_id: &str) -> bool {
        self.set_rule_enabled(rule_id, false).await
    }

    async fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        let mut rules = self.rules.write().await;
        match rules.get_mut(rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                info!(rule_id = %rule_id, enabled, "Alert rule toggled");
                true
            }
            None => false,
        }
    }

    /// 规则列表，按 ID 排序
    pub async fn rules(&self) -> Vec<AlertRule> {
        let rules = self.rules.read().await;
        let mut list: Vec<AlertRule> = rules.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// 规则数量
    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    /// 尝试按规则创建告警
    ///
    /// 未注册或被停用的规则、节流窗口内的重复触发、类别不匹配、
    /// 条件为 false 或求值失败都返回 `None`。只有真正落盘的告警
    /// 才会刷新该规则的节流时间。
    pub async fn create_alert(
        &self,
        rule_id: &str,
        context: &RuleContext,
        custom_message: Option<&str>,
    ) -> Option<Alert> {
        let rule = {
            let rules = self.rules.read().await;
            match rules.get(rule_id) {
                Some(rule) => rule.clone(),
                None => {
                    warn!(rule_id = %rule_id, "Alert requested for unknown rule, ignored");
                    return None;
                }
            }
        };

        if !rule.enabled {
            debug!(rule_id = %rule_id, "Alert rule disabled, skipped");
            return None;
        }

        let now = self.clock.now();
        // 节流时间表在整个判定期间持锁，两个并发触发不会同时通过检查
        let mut last_fired = self.last_fired.write().await;

        if let Some(last) = last_fired.get(rule_id) {
            let throttle = ChronoDuration::milliseconds(rule.throttle.as_millis() as i64);
            if now.signed_duration_since(*last) < throttle {
                debug!(rule_id = %rule_id, "Alert throttled");
                return None;
            }
        }

        if !rule.matches(context) {
            debug!(rule_id = %rule_id, "Context category mismatch, skipped");
            return None;
        }

        let fired = match rule.evaluate(context) {
            Ok(fired) => fired,
            Err(err) => {
                // 条件报错按未触发处理，不影响其他规则
                warn!(rule_id = %rule_id, error = %err, "Rule condition failed, treated as not firing");
                false
            }
        };
        if !fired {
            return None;
        }

        let message = custom_message
            .map(str::to_string)
            .or_else(|| (!rule.description.is_empty()).then(|| rule.description.clone()))
            .unwrap_or_else(|| rule.name.clone());

        let alert = Alert::new(&rule.id, &rule.name, message, rule.severity, &rule.source, now)
            .with_metadata("context", context.to_value());

        last_fired.insert(rule.id.clone(), now);
        drop(last_fired);

        let mut alerts = self.alerts.write().await;
        alerts.push_back(alert.clone());
        // 超出容量时丢弃最旧告警
        while alerts.len() > self.max_history {
            alerts.pop_front();
        }
        drop(alerts);

        info!(
            alert_id = %alert.id,
            rule_id = %rule.id,
            severity = %alert.severity,
            "Alert created"
        );
        Some(alert)
    }

    /// 确认告警，返回是否存在；重复确认不改变首次记录
    pub async fn acknowledge(&self, alert_id: &str, by: &str) -> bool {
        let now = self.clock.now();
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledge(by, now);
                info!(alert_id = %alert_id, by = %by, "Alert acknowledged");
                true
            }
            None => {
                debug!(alert_id = %alert_id, "Acknowledge for unknown alert");
                false
            }
        }
    }

    /// 解决告警，返回是否存在；与确认互不依赖
    pub async fn resolve(&self, alert_id: &str) -> bool {
        let now = self.clock.now();
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.resolve(now);
                info!(alert_id = %alert_id, "Alert resolved");
                true
            }
            None => {
                debug!(alert_id = %alert_id, "Resolve for unknown alert");
                false
            }
        }
    }

    /// 按 ID 查找告警
    pub async fn get(&self, alert_id: &str) -> Option<Alert> {
        self.alerts.read().await.iter().find(|a| a.id == alert_id).cloned()
    }

    /// 未解决的告警
    pub async fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.iter().filter(|a| a.is_active()).cloned().collect()
    }

    /// 按级别过滤告警
    pub async fn alerts_by_severity(&self, severity: AlertSeverity) -> Vec<Alert> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| a.severity == severity)
            .cloned()
            .collect()
    }

    /// 按来源过滤告警
    pub async fn alerts_by_source(&self, source: &str) -> Vec<Alert> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| a.source == source)
            .cloned()
            .collect()
    }

    /// 指定时间之后创建的告警
    pub async fn alerts_since(&self, since: DateTime<Utc>) -> Vec<Alert> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| a.timestamp >= since)
            .cloned()
            .collect()
    }

    /// 告警总数（含已解决）
    pub async fn alert_count(&self) -> usize {
        self.alerts.read().await.len()
    }

    /// 清理早于指定时长且已解决的告警，返回清理数量
    ///
    /// 活动告警不论多旧都保留。
    pub async fn clear_old(&self, older_than: Duration) -> usize {
        let cutoff = self.clock.now() - ChronoDuration::milliseconds(older_than.as_millis() as i64);
        let mut alerts = self.alerts.write().await;
        let before = alerts.len();
        alerts.retain(|a| !(a.resolved && a.timestamp < cutoff));
        let removed = before - alerts.len();
        if removed > 0 {
            info!(removed, "Old resolved alerts cleared");
        }
        removed
    }

    /// 告警统计
    pub async fn stats(&self) -> AlertStats {
        let alerts = self.alerts.read().await;
        let mut stats = AlertStats {
            total: alerts.len(),
            ..AlertStats::default()
        };

        for alert in alerts.iter() {
            if alert.is_active() {
                stats.active += 1;
            }
            if alert.acknowledged {
                stats.acknowledged += 1;
            }
            if alert.resolved {
                stats.resolved += 1;
            }
            *stats.by_severity.entry(alert.severity.to_string()).or_insert(0) += 1;
            *stats.by_source.entry(alert.source.clone()).or_insert(0) += 1;
        }
        stats
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}
