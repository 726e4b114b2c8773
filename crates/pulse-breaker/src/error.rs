use std::time::Duration;
use thiserror::Error;

/// 经熔断器执行调用时的错误
///
/// `Open`、`HalfOpenLimit`、`Timeout` 是基础设施层面的拒绝或中止，
/// `Inner` 原样携带被包装操作自身的错误，便于调用方区分
/// “熔断器拒绝了调用”与“调用本身失败”并采用不同的重试策略。
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// 熔断器处于打开状态，调用未被执行
    #[error("circuit breaker '{name}' is open, retry after {retry_after:?}")]
    Open {
        name: String,
        /// 距下次允许探测的剩余时间
        retry_after: Duration,
    },

    /// 半开探测名额已满，调用未被执行，稍后可重试
    #[error("circuit breaker '{name}' is half-open and its probe budget is exhausted")]
    HalfOpenLimit { name: String },

    /// 调用超过单次超时时间，按失败计数
    #[error("operation through circuit breaker '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    /// 被包装操作自身的错误
    #[error("{0}")]
    Inner(E),
}

impl<E> CallError<E> {
    /// 调用是否被熔断器拒绝（操作未执行）
    pub fn is_rejection(&self) -> bool {
        matches!(self, CallError::Open { .. } | CallError::HalfOpenLimit { .. })
    }

    /// 是否为单次调用超时
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }

    /// 取出被包装操作的错误
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::Inner(err) => Some(err),
            _ => None,
        }
    }

    /// 引用被包装操作的错误
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            CallError::Inner(err) => Some(err),
            _ => None,
        }
    }
}
