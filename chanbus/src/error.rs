//! 统一错误定义
//!
//! `BusError` 覆盖配置校验、类型化事件编解码与通道匹配；
//! `RequestError` 是 `request()` 的拒绝类型，携带响应方的错误载荷。
//!
use thiserror::Error;

/// 总线/通道层错误
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BusError {
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("invalid config: channel={channel}, event={event}, reason={reason}")]
    InvalidConfig {
        channel: String,
        event: String,
        reason: String,
    },
    #[error("channel mismatch: expected={expected}, found={found}")]
    ChannelMismatch { expected: String, found: String },
}

impl BusError {
    pub fn invalid_config(
        channel: impl Into<String>,
        event: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        BusError::InvalidConfig {
            channel: channel.into(),
            event: event.into(),
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type BusResult<T> = Result<T, BusError>;

/// 请求（request/response）失败原因
///
/// 取消不是错误：被取消的请求以 `Ok(None)` 结束，不会出现在这里。
#[derive(Debug, Error)]
pub enum RequestError<P> {
    #[error("There isn't a responder for the event \"{event}\" (channel={channel})")]
    MissingResponder { channel: String, event: String },
    #[error("request rejected: event={event}")]
    Rejected { event: String, error: P },
    #[error("responder dropped without replying: event={event}")]
    Abandoned { event: String },
    #[error("no tokio runtime available to drive the responder: event={event}")]
    NoRuntime { event: String },
}

impl<P> RequestError<P> {
    /// 响应方拒绝时的错误载荷（其余情况返回 None）
    pub fn into_rejection(self) -> Option<P> {
        match self {
            RequestError::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn event(&self) -> &str {
        match self {
            RequestError::MissingResponder { event, .. }
            | RequestError::Rejected { event, .. }
            | RequestError::Abandoned { event }
            | RequestError::NoRuntime { event } => event,
        }
    }
}
