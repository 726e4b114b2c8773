use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 告警实例
///
/// 确认与解决是两条独立的生命周期轨道：
/// 确认表示有人在处理，解决表示问题已消除，互不依赖。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// 由规则 ID 与创建时间派生的唯一键
    pub id: String,
    pub rule_id: String,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    /// 触发时的上下文快照等附加信息
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Alert {
    pub fn new(
        rule_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: AlertSeverity,
        source: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let rule_id = rule_id.into();
        let id = format!("{}_{}", rule_id, now.timestamp_millis());
        Self {
            id,
            rule_id,
            title: title.into(),
            message: message.into(),
            severity,
            source: source.into(),
            timestamp: now,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved: false,
            resolved_at: None,
            metadata: HashMap::new(),
        }
    }

    /// 附加一条元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 确认告警，重复确认保持首次记录不变
    pub fn acknowledge(&mut self, by: impl Into<String>, now: DateTime<Utc>) {
        if self.acknowledged {
            return;
        }
        self.acknowledged = true;
        self.acknowledged_by = Some(by.into());
        self.acknowledged_at = Some(now);
    }

    /// 解决告警，重复解决保持首次记录不变
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        self.resolved_at = Some(now);
    }

    /// 是否仍处于活动状态
    pub fn is_active(&self) -> bool {
        !self.resolved
    }
}

/// 告警统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub by_severity: HashMap<String, usize>,
    pub by_source: HashMap<String, usize>,
}
