use thiserror::Error;

/// PULSE 统一错误类型
#[derive(Error, Debug)]
pub enum PulseError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 输入无效
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 对象未找到
    #[error("Not found: {0}")]
    NotFound(String),

    /// 对象已存在
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, PulseError>;

impl From<anyhow::Error> for PulseError {
    fn from(err: anyhow::Error) -> Self {
        PulseError::Internal(err.to_string())
    }
}

impl PulseError {
    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        PulseError::Config(msg.into())
    }

    /// 创建输入无效错误
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        PulseError::InvalidInput(msg.into())
    }

    /// 创建未找到错误
    pub fn not_found(msg: impl Into<String>) -> Self {
        PulseError::NotFound(msg.into())
    }

    /// 创建内部错误
    pub fn internal(msg: impl Into<String>) -> Self {
        PulseError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PulseError::config("missing section");
        assert_eq!(err.to_string(), "Configuration error: missing section");

        let err = PulseError::not_found("slo availability");
        assert_eq!(err.to_string(), "Not found: slo availability");
    }

    #[test]
    fn test_from_anyhow() {
        let err: PulseError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, PulseError::Internal(_)));
    }
}
