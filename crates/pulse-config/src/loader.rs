use anyhow::{anyhow, Result};
use config::{Config, File, FileFormat};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::PulseConfig;

/// 配置文件名
const CONFIG_FILE: &str = "pulse.toml";

/// 配置加载器
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }

    /// 加载配置
    pub fn load(&self) -> Result<PulseConfig> {
        let config_path = self.config_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            // 配置文件不存在时返回默认配置
            return Ok(PulseConfig::default());
        }

        let config = Config::builder()
            .add_source(File::new(
                config_path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        let config = self.load()?;

        if config.breaker.failure_threshold == 0 {
            return Err(anyhow!("breaker.failure_threshold must be greater than 0"));
        }
        if config.breaker.success_threshold == 0 {
            return Err(anyhow!("breaker.success_threshold must be greater than 0"));
        }
        if config.breaker.timeout_ms == 0 || config.breaker.request_timeout_ms == 0 {
            return Err(anyhow!("breaker timeouts must be greater than 0"));
        }

        if config.metrics.history_capacity == 0 {
            return Err(anyhow!("metrics.history_capacity must be greater than 0"));
        }
        if config.metrics.aggregation_interval_ms == 0 {
            return Err(anyhow!("metrics.aggregation_interval_ms must be greater than 0"));
        }
        if config.metrics.aggregate_retention_hours == 0 {
            return Err(anyhow!("metrics.aggregate_retention_hours must be greater than 0"));
        }

        let mut names = HashSet::new();
        for slo in &config.slo {
            if slo.name.is_empty() {
                return Err(anyhow!("slo name must not be empty"));
            }
            if !names.insert(slo.name.as_str()) {
                return Err(anyhow!("duplicate slo name: {}", slo.name));
            }
            if !(slo.target > 0.0 && slo.target <= 100.0) {
                return Err(anyhow!(
                    "slo target must be in (0, 100], got {} for {}",
                    slo.target,
                    slo.name
                ));
            }
            if slo.window_secs == 0 {
                return Err(anyhow!("slo window_secs must be greater than 0 for {}", slo.name));
            }
            if slo.burn_rate_threshold <= 0.0 {
                return Err(anyhow!(
                    "slo burn_rate_threshold must be greater than 0 for {}",
                    slo.name
                ));
            }
        }

        if config.alert.max_history == 0 {
            return Err(anyhow!("alert.max_history must be greater than 0"));
        }
        if config.alert.evaluation_interval_ms == 0 {
            return Err(anyhow!("alert.evaluation_interval_ms must be greater than 0"));
        }

        Ok(())
    }
}
