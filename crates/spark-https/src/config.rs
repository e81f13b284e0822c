use serde::{Deserialize, Serialize};
use spark_transport_sspi::SecureTransportConfig;
use spark_transport_tcp::TcpSocketConfig;

use crate::error::HttpsError;
use crate::response::ResponseLimits;

pub const DEFAULT_USER_AGENT: &str = concat!("spark-https/", env!("CARGO_PKG_VERSION"));

/// HTTPS 门面的客户端配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 门面本身没有持久状态，所有可调参数集中在一个可序列化结构里，
///   宿主可以从 TOML 片段一次性加载；
/// - 嵌套的 [`TcpSocketConfig`] 与 [`SecureTransportConfig`] 原样复用传输层定义，
///   同一份配置既驱动明文连接也驱动安全连接。
///
/// ## 契约（What）
/// - `write_chunk`：单次 `write` 的上限，实际分片取它与连接 `max_write_len` 的较小值；
/// - `read_chunk`：每次读取响应时使用的缓冲大小；
/// - `max_header_bytes` / `max_response_bytes`：超过即报 `ResponseTooLarge`；
/// - 缺省字段取 [`Default`]，未知字段报错。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub user_agent: String,
    pub write_chunk: usize,
    pub read_chunk: usize,
    pub max_header_bytes: usize,
    pub max_response_bytes: usize,
    pub socket: TcpSocketConfig,
    pub secure: SecureTransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            write_chunk: 16 * 1024,
            read_chunk: 8 * 1024,
            max_header_bytes: 64 * 1024,
            max_response_bytes: 64 * 1024 * 1024,
            socket: TcpSocketConfig::default(),
            secure: SecureTransportConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, HttpsError> {
        Ok(toml::from_str(source)?)
    }

    pub(crate) fn response_limits(&self) -> ResponseLimits {
        ResponseLimits {
            read_chunk: self.read_chunk.max(1),
            max_header_bytes: self.max_header_bytes,
            max_response_bytes: self.max_response_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientConfig, DEFAULT_USER_AGENT};
    use crate::error::HttpsError;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(ClientConfig::from_toml_str("").expect("empty"), ClientConfig::default());
        assert!(DEFAULT_USER_AGENT.starts_with("spark-https/"));
    }

    #[test]
    fn nested_sections_override_selectively() {
        let config = ClientConfig::from_toml_str(
            r#"
            user_agent = "probe/1"
            write_chunk = 1024

            [secure.credentials.protocols]
            tls1_3 = true
            "#,
        )
        .expect("parse");
        assert_eq!(config.user_agent, "probe/1");
        assert_eq!(config.write_chunk, 1024);
        assert_eq!(config.read_chunk, ClientConfig::default().read_chunk);
        assert!(config.secure.credentials.protocols.tls1_3);
        assert!(config.secure.credentials.protocols.tls1_2);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ClientConfig::from_toml_str("retries = 3").expect_err("unknown field");
        assert!(matches!(err, HttpsError::Config(_)));
        assert_eq!(err.code(), "spark.https.invalid_config");
    }
}
