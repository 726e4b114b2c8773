use pulse_core::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::breaker::{BreakerMetrics, CircuitBreaker};
use crate::config::BreakerConfig;

/// 熔断器注册表
///
/// 按名称惰性创建熔断器，同名请求返回同一实例。
/// 实例与进程同生命周期，只能通过 `reset` 做运维复位。
pub struct BreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    default_config: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    /// 创建使用系统时钟的注册表
    pub fn new(default_config: BreakerConfig) -> Self {
        Self::with_clock(default_config, Arc::new(SystemClock))
    }

    /// 创建使用指定时钟的注册表
    pub fn with_clock(default_config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            default_config,
            clock,
        }
    }

    /// 默认配置
    pub fn default_config(&self) -> &BreakerConfig {
        &self.default_config
    }

    /// 获取或按默认配置创建命名熔断器
    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.register(name, self.default_config.clone()).await
    }

    /// 获取或按指定配置创建命名熔断器
    ///
    /// 名称已存在时返回现有实例，首次注册的配置生效。
    pub async fn register(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(name) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().await;
        // 双重检查，避免并发创建出两个实例
        if let Some(breaker) = breakers.get(name) {
            return breaker.clone();
        }

        info!(breaker = %name, "Circuit breaker created");
        let breaker = Arc::new(CircuitBreaker::with_clock(name, config, self.clock.clone()));
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// 查找已存在的熔断器
    pub async fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().await.get(name).cloned()
    }

    /// 已注册的名称列表
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 已注册的熔断器数量
    pub async fn len(&self) -> usize {
        self.breakers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.breakers.read().await.is_empty()
    }

    /// 全部熔断器的快照，按名称排序
    pub async fn all_metrics(&self) -> Vec<BreakerMetrics> {
        let breakers = self.breakers.read().await;
        let mut metrics: Vec<BreakerMetrics> = breakers.values().map(|b| b.metrics()).collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// 复位指定熔断器，返回是否存在
    pub async fn reset(&self, name: &str) -> bool {
        match self.breakers.read().await.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// 复位全部熔断器
    pub async fn reset_all(&self) {
        let breakers = self.breakers.read().await;
        for breaker in breakers.values() {
            breaker.reset();
        }
        info!(count = breakers.len(), "All circuit breakers reset");
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
