use spark_transport::TransportError;
use thiserror::Error;

/// HTTPS 门面的统一错误。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 传输层错误保持原样包裹，调用方仍可读取稳定错误码与 [`spark_transport::ErrorKind`]；
/// - URL、HTTP 报文与后端选择等门面自身的失败各自独立成枚举分支，便于按类别处理。
///
/// ## 契约（What）
/// - [`HttpsError::code`] 返回稳定的点分错误码，传输层错误沿用其自身错误码；
/// - `NoApplicableBackend` 的文案固定为 `No applicable implementation found`。
#[derive(Debug, Error)]
pub enum HttpsError {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: &'static str },

    #[error("unsupported url scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("invalid method `{0}`")]
    InvalidMethod(String),

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: &'static str },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed http response: {0}")]
    Protocol(&'static str),

    #[error("http response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("connection closed while reading {0}")]
    Truncated(&'static str),

    #[error("No applicable implementation found")]
    NoApplicableBackend,

    #[error("invalid client configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl HttpsError {
    pub fn code(&self) -> &'static str {
        match self {
            HttpsError::InvalidUrl { .. } => "spark.https.invalid_url",
            HttpsError::UnsupportedScheme(_) => "spark.https.unsupported_scheme",
            HttpsError::InvalidMethod(_) => "spark.https.invalid_method",
            HttpsError::InvalidHeader { .. } => "spark.https.invalid_header",
            HttpsError::Transport(err) => err.code(),
            HttpsError::Protocol(_) => "spark.https.protocol_error",
            HttpsError::ResponseTooLarge { .. } => "spark.https.response_too_large",
            HttpsError::Truncated(_) => "spark.https.truncated_response",
            HttpsError::NoApplicableBackend => "spark.https.no_applicable_backend",
            HttpsError::Config(_) => "spark.https.invalid_config",
        }
    }
}
