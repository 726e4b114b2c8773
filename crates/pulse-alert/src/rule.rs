use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::model::AlertSeverity;

/// 规则类别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    CircuitBreaker,
    Slo,
    Metric,
    Quota,
    Cost,
    Custom(String),
}

/// 规则求值上下文
///
/// 带类别标签的变体枚举，规则只会收到与其类别匹配的上下文，
/// 条件闭包因此可以直接解构出强类型字段，无需自行判别来源。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RuleContext {
    /// 熔断器状态快照
    CircuitBreaker {
        name: String,
        state: String,
        failure_count: u64,
        request_count: u64,
    },
    /// SLO 状态快照
    Slo {
        name: String,
        health: String,
        current: f64,
        error_budget: f64,
        burn_rate: f64,
    },
    /// 单个指标值
    Metric {
        kind: String,
        value: f64,
        success: bool,
    },
    /// 配额用量
    Quota {
        resource: String,
        used: f64,
        limit: f64,
    },
    /// 成本用量
    Cost {
        #[serde(rename = "cost_category")]
        category: String,
        amount: f64,
        budget: f64,
    },
    /// 自定义载荷
    Custom {
        tag: String,
        data: serde_json::Value,
    },
}

impl RuleContext {
    /// 上下文所属类别
    pub fn category(&self) -> RuleCategory {
        match self {
            RuleContext::CircuitBreaker { .. } => RuleCategory::CircuitBreaker,
            RuleContext::Slo { .. } => RuleCategory::Slo,
            RuleContext::Metric { .. } => RuleCategory::Metric,
            RuleContext::Quota { .. } => RuleCategory::Quota,
            RuleContext::Cost { .. } => RuleCategory::Cost,
            RuleContext::Custom { tag, .. } => RuleCategory::Custom(tag.clone()),
        }
    }

    /// 转为 JSON 值，用于写入告警元数据
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// 规则条件：对上下文求值，可失败
pub type RuleCondition = Arc<dyn Fn(&RuleContext) -> anyhow::Result<bool> + Send + Sync>;

/// 告警规则
#[derive(Clone)]
pub struct AlertRule {
    /// 规则唯一 ID
    pub id: String,
    /// 规则名称，作为告警标题
    pub name: String,
    /// 规则描述，作为默认告警内容
    pub description: String,
    pub severity: AlertSeverity,
    /// 告警来源标识（如 breaker / slo / quota）
    pub source: String,
    pub category: RuleCategory,
    /// 同一规则两次触发之间的最小间隔
    pub throttle: Duration,
    pub enabled: bool,
    condition: RuleCondition,
}

impl AlertRule {
    /// 创建规则，节流间隔默认 60 秒
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        severity: AlertSeverity,
        source: impl Into<String>,
        category: RuleCategory,
        condition: impl Fn(&RuleContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            severity,
            source: source.into(),
            category,
            throttle: Duration::from_secs(60),
            enabled: true,
            condition: Arc::new(condition),
        }
    }

    /// 设置规则描述
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 设置节流间隔
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// 创建时即停用
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 上下文类别是否与规则匹配
    pub fn matches(&self, context: &RuleContext) -> bool {
        self.category == context.category()
    }

    /// 对上下文求值
    pub fn evaluate(&self, context: &RuleContext) -> anyhow::Result<bool> {
        (self.condition)(context)
    }
}

impl fmt::Debug for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("source", &self.source)
            .field("category", &self.category)
            .field("throttle", &self.throttle)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker_context(state: &str, failures: u64) -> RuleContext {
        RuleContext::CircuitBreaker {
            name: "database".to_string(),
            state: state.to_string(),
            failure_count: failures,
            request_count: failures,
        }
    }

    #[test]
    fn test_category_matching() {
        let rule = AlertRule::new(
            "breaker-open",
            "Breaker opened",
            AlertSeverity::Error,
            "breaker",
            RuleCategory::CircuitBreaker,
            |ctx| match ctx {
                RuleContext::CircuitBreaker { state, .. } => Ok(state == "open"),
                _ => Ok(false),
            },
        );

        assert!(rule.matches(&breaker_context("open", 5)));
        assert!(!rule.matches(&RuleContext::Metric {
            kind: "api_response_time".to_string(),
            value: 1.0,
            success: true,
        }));
    }

    #[test]
    fn test_custom_category_matches_by_tag() {
        let rule = AlertRule::new(
            "gpu-pressure",
            "GPU pressure",
            AlertSeverity::Warning,
            "custom",
            RuleCategory::Custom("gpu".to_string()),
            |_| Ok(true),
        );

        let gpu = RuleContext::Custom {
            tag: "gpu".to_string(),
            data: serde_json::json!({"util": 0.97}),
        };
        let disk = RuleContext::Custom {
            tag: "disk".to_string(),
            data: serde_json::Value::Null,
        };

        assert!(rule.matches(&gpu));
        assert!(!rule.matches(&disk));
    }

    #[test]
    fn test_evaluate_typed_fields() {
        let rule = AlertRule::new(
            "breaker-failures",
            "Too many failures",
            AlertSeverity::Warning,
            "breaker",
            RuleCategory::CircuitBreaker,
            |ctx| match ctx {
                RuleContext::CircuitBreaker { failure_count, .. } => Ok(*failure_count >= 3),
                _ => Ok(false),
            },
        );

        assert!(!rule.evaluate(&breaker_context("closed", 2)).unwrap());
        assert!(rule.evaluate(&breaker_context("closed", 3)).unwrap());
    }

    #[test]
    fn test_context_serializes_with_category_tag() {
        let ctx = breaker_context("open", 5);
        let value = ctx.to_value();

        assert_eq!(value["category"], "circuit_breaker");
        assert_eq!(value["state"], "open");
        assert_eq!(value["failure_count"], 5);
    }

    #[test]
    fn test_condition_error_surfaces() {
        let rule = AlertRule::new(
            "broken",
            "Broken rule",
            AlertSeverity::Info,
            "test",
            RuleCategory::Metric,
            |_| anyhow::bail!("bad condition"),
        );

        let ctx = RuleContext::Metric {
            kind: "x".to_string(),
            value: 0.0,
            success: true,
        };
        assert!(rule.evaluate(&ctx).is_err());
    }
}
