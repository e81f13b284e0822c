use std::borrow::Cow;
use std::error::Error as StdError;

/// 传输层错误的语义分类。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 上层（HTTPS 门面、后端选择逻辑）只关心“这次失败属于哪一类”，而不关心具体来自
///   套接字、系统 TLS 原语还是记录层；
/// - 分类与稳定错误码配合，使日志与测试无需解析底层错误文本即可定位问题。
///
/// ## 契约（What）
/// - `HandshakeFailure`：握手被中止（凭据、对端拒绝、协议不匹配、上下文属性不足）；
/// - `TransportFailure`：底层套接字建连/读/写失败；
/// - `RecordFailure`：加解密原语返回了“消息不完整”之外的错误，或记录积压超出限制；
/// - `PeerClosed`：对端关闭且无缓冲数据；
/// - `Timeout`：套接字超时；
/// - `Unsupported`：当前平台或状态不支持该操作（例如未连接即读写）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    HandshakeFailure,
    TransportFailure,
    RecordFailure,
    PeerClosed,
    Timeout,
    Unsupported,
}

impl ErrorKind {
    /// 返回分类的稳定短名，便于作为日志字段。
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::HandshakeFailure => "handshake_failure",
            ErrorKind::TransportFailure => "transport_failure",
            ErrorKind::RecordFailure => "record_failure",
            ErrorKind::PeerClosed => "peer_closed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unsupported => "unsupported",
        }
    }
}

/// 传输层统一错误：稳定错误码 + 人类可读文案 + 分类 + 可选底层原因。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 与框架 `CoreError::new(code, message).with_category(..)` 的形态保持一致，
///   让 TCP、安全上下文与 HTTPS 门面共享同一错误语言；
/// - 错误码（如 `spark.transport.sspi.handshake_failed`）是对外稳定契约，文案可自由演进。
///
/// ## 逻辑（How）
/// - `new` 默认分类为 `TransportFailure`，通过 `with_kind` 调整；
/// - `with_source` 挂载底层 `io::Error` 或平台状态码，`std::error::Error::source` 可逐级回溯。
///
/// ## 契约（What）
/// - `code()` 与 `kind()` 在错误生命周期内不变；
/// - `Display` 输出 `"<message> [<code>]"`。
#[derive(Debug, thiserror::Error)]
#[error("{message} [{code}]")]
pub struct TransportError {
    code: &'static str,
    message: Cow<'static, str>,
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl TransportError {
    /// 以稳定错误码与文案构造错误，默认分类为 [`ErrorKind::TransportFailure`]。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: ErrorKind::TransportFailure,
            source: None,
        }
    }

    /// 设置错误分类。
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// 挂载底层原因。
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, TransportError};
    use std::error::Error as _;
    use std::io;

    #[test]
    fn display_carries_message_and_code() {
        let err = TransportError::new("spark.transport.test.failed", "test op failed")
            .with_kind(ErrorKind::RecordFailure);
        assert_eq!(err.to_string(), "test op failed [spark.transport.test.failed]");
        assert_eq!(err.kind(), ErrorKind::RecordFailure);
        assert_eq!(err.kind().as_str(), "record_failure");
    }

    #[test]
    fn source_chain_is_preserved() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = TransportError::new("spark.transport.test.read_failed", "read").with_source(io_err);
        let source = err.source().expect("source should be attached");
        assert!(source.to_string().contains("reset by peer"));
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }
}
