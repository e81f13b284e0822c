use serde::{Deserialize, Serialize};

/// 默认的握手读取块大小。
pub const DEFAULT_HANDSHAKE_READ_CHUNK: usize = 8 * 1024;

/// TLS 明文记录上限（2^14）加上密文扩展上限（2048），即线路上单条记录的最大长度。
pub const MAX_TLS_RECORD: usize = 16 * 1024 + 2048;

/// 启用的协议版本集合。
///
/// 默认只启用 TLS 1.2：TLS 1.3 服务端会在握手后发送会话票据，系统原语以“重新协商”
/// 状态上报，记录层当前将其视为记录错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolVersions {
    pub tls1_0: bool,
    pub tls1_1: bool,
    pub tls1_2: bool,
    pub tls1_3: bool,
}

impl Default for ProtocolVersions {
    fn default() -> Self {
        Self {
            tls1_0: false,
            tls1_1: false,
            tls1_2: true,
            tls1_3: false,
        }
    }
}

impl ProtocolVersions {
    /// 是否至少启用了一个版本。
    pub fn any_enabled(&self) -> bool {
        self.tls1_0 || self.tls1_1 || self.tls1_2 || self.tls1_3
    }
}

/// 客户端凭据策略：协议版本与服务端校验方式。
///
/// # 契约（What）
/// - `validate_server`：由系统自动校验证书链与主机名；关闭后需调用方自行校验（仅用于测试环境）；
/// - `revocation_check`：校验整条证书链的吊销状态；
/// - `strong_crypto`：禁用弱密码套件。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialPolicy {
    pub protocols: ProtocolVersions,
    pub validate_server: bool,
    pub revocation_check: bool,
    pub strong_crypto: bool,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            protocols: ProtocolVersions::default(),
            validate_server: true,
            revocation_check: true,
            strong_crypto: true,
        }
    }
}

/// 记录层解密循环的资源上限。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 一条记录迟迟不完整时，解密循环会不断补读并累积密文；若不设上限，
///   恶意或异常对端可以让内存无界增长；
/// - 以字节上限取代隐式递归深度，使“最多攒多少”可配置、可测试；
///   “最多等多久”交给套接字读超时，慢速但持续送达的对端不受影响。
///
/// ## 契约（What）
/// - `max_pending_ciphertext`：单次 `read` 为凑齐一条记录最多累积的密文字节数；
/// - 上限被触发时，本次读取以记录错误结束，连接随之失效；
/// - 补读次数不设上限：每轮补读要么带来新字节，要么以 EOF 结束本次读取。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecLimits {
    pub max_pending_ciphertext: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_pending_ciphertext: 2 * MAX_TLS_RECORD,
        }
    }
}

/// 安全连接的整体配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecureTransportConfig {
    pub credentials: CredentialPolicy,
    pub handshake_read_chunk: usize,
    pub limits: CodecLimits,
}

impl Default for SecureTransportConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialPolicy::default(),
            handshake_read_chunk: DEFAULT_HANDSHAKE_READ_CHUNK,
            limits: CodecLimits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CodecLimits, MAX_TLS_RECORD, ProtocolVersions, SecureTransportConfig};

    #[test]
    fn defaults_enable_only_tls12() {
        let versions = ProtocolVersions::default();
        assert!(versions.tls1_2);
        assert!(!versions.tls1_0 && !versions.tls1_1 && !versions.tls1_3);
        assert!(versions.any_enabled());
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config: SecureTransportConfig = toml::from_str(
            r#"
            handshake_read_chunk = 4096

            [credentials.protocols]
            tls1_3 = true

            [limits]
            max_pending_ciphertext = 65536
            "#,
        )
        .expect("parse secure transport config");
        assert_eq!(config.handshake_read_chunk, 4096);
        assert!(config.credentials.protocols.tls1_3);
        assert!(config.credentials.protocols.tls1_2);
        assert!(config.credentials.revocation_check);
        assert_eq!(config.limits.max_pending_ciphertext, 65536);
        assert_eq!(CodecLimits::default().max_pending_ciphertext, 2 * MAX_TLS_RECORD);
    }
}
