use spark_transport::{ErrorKind, TransportError};

use crate::provider::ProviderStatus;

/// 安全连接错误映射模块。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将平台原语的状态码与握手/记录层的异常统一映射为 [`TransportError`]，
///   并按 `HandshakeFailure`/`RecordFailure`/`Unsupported` 分类，供门面决定是否继续读取；
/// - 提供稳定错误码，测试与日志按错误码断言，无需解析平台细节。
///
/// ## 契约（What）
/// - `OperationKind` 描述一类操作的错误码与默认文案；
/// - `handshake_error`/`record_error` 生成对应分类的错误，可选挂载 [`ProviderStatus`] 作为来源。
///
/// ## 风险与权衡（Trade-offs）
/// - 原始套接字错误不在此处映射，直接透传 `spark-transport-tcp` 给出的分类。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const CREDENTIALS: OperationKind = OperationKind {
    code: "spark.transport.sspi.credentials_failed",
    message: "sspi acquire credentials",
};

pub(crate) const HANDSHAKE: OperationKind = OperationKind {
    code: "spark.transport.sspi.handshake_failed",
    message: "sspi handshake",
};

pub(crate) const HANDSHAKE_EOF: OperationKind = OperationKind {
    code: "spark.transport.sspi.handshake_eof",
    message: "sspi handshake: peer closed before negotiation finished",
};

pub(crate) const PROTECTION: OperationKind = OperationKind {
    code: "spark.transport.sspi.insufficient_protection",
    message: "sspi handshake: context lacks confidentiality or integrity",
};

pub(crate) const STREAM_SIZES: OperationKind = OperationKind {
    code: "spark.transport.sspi.stream_sizes_failed",
    message: "sspi query stream sizes",
};

pub(crate) const DECRYPT: OperationKind = OperationKind {
    code: "spark.transport.sspi.decrypt_failed",
    message: "sspi decrypt",
};

pub(crate) const RENEGOTIATE: OperationKind = OperationKind {
    code: "spark.transport.sspi.renegotiation_requested",
    message: "sspi decrypt: peer requested renegotiation",
};

pub(crate) const BACKLOG: OperationKind = OperationKind {
    code: "spark.transport.sspi.record_backlog_exceeded",
    message: "sspi decrypt: incomplete record exceeded buffering limits",
};

pub(crate) const POISONED: OperationKind = OperationKind {
    code: "spark.transport.sspi.stream_poisoned",
    message: "sspi record stream unusable after an earlier record failure",
};

pub(crate) const ENCRYPT: OperationKind = OperationKind {
    code: "spark.transport.sspi.encrypt_failed",
    message: "sspi encrypt",
};

pub(crate) const PAYLOAD_TOO_LARGE: OperationKind = OperationKind {
    code: "spark.transport.sspi.payload_too_large",
    message: "sspi encrypt: payload exceeds the maximum single-record size",
};

pub(crate) const NOT_CONNECTED: OperationKind = OperationKind {
    code: "spark.transport.sspi.not_connected",
    message: "sspi connection used before connect",
};

pub(crate) fn handshake_error(kind: OperationKind, detail: Option<ProviderStatus>) -> TransportError {
    build(kind, ErrorKind::HandshakeFailure, detail)
}

pub(crate) fn record_error(kind: OperationKind, detail: Option<ProviderStatus>) -> TransportError {
    build(kind, ErrorKind::RecordFailure, detail)
}

pub(crate) fn not_connected() -> TransportError {
    build(NOT_CONNECTED, ErrorKind::Unsupported, None)
}

fn build(kind: OperationKind, category: ErrorKind, detail: Option<ProviderStatus>) -> TransportError {
    match detail {
        Some(status) => TransportError::new(kind.code, format!("{}: {}", kind.message, status))
            .with_kind(category)
            .with_source(status),
        None => TransportError::new(kind.code, kind.message).with_kind(category),
    }
}
