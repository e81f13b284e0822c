use spark_transport::{Connection, ErrorKind, TransportError};
use spark_transport_tcp::TcpConnection;

use crate::{
    codec::RecordCodec,
    config::SecureTransportConfig,
    error,
    negotiator::Negotiator,
    provider::SecurityProvider,
};

/// 一次成功握手的会话状态。
///
/// 字段声明顺序即释放顺序：记录层（含安全上下文）先于凭据释放。
struct Session<P: SecurityProvider> {
    codec: RecordCodec<P::Context>,
    _credentials: P::Credentials,
}

/// 基于系统 TLS 原语的客户端安全连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 对上层暴露与明文 TCP 完全相同的 [`Connection`] 契约，HTTPS 门面无需区分协议；
/// - 组合“原始套接字 + 握手驱动器 + 记录层”三者，并集中管理它们的生命周期。
///
/// ## 核心逻辑（How）
/// - `connect`：先关闭旧会话，再建立原始连接、运行 [`Negotiator`]，成功后以握手剩余字节
///   初始化 [`RecordCodec`]；任一步骤失败都会关闭原始连接，局部的上下文与凭据随作用域释放；
/// - `read`/`write`：委托记录层；`RecordFailure` 以告警日志记录并折算为 `Ok(0)`；
/// - `close`：释放会话后关闭原始连接，可重复调用。
///
/// ## 契约（What）
/// - `read` 返回 0 表示流结束或记录层失败，调用方应将其视为 EOF；
/// - `write` 单次最多接受 [`Connection::max_write_len`] 字节，超出部分由调用方分块；
/// - 未连接时读写返回 `Unsupported`；关闭后 `read` 恒为 `Ok(0)`。
///
/// ## 风险与权衡（Trade-offs）
/// - 关闭时不发送 TLS 关闭通知，对端看到的是 TCP 层的关闭；
/// - 握手失败后实例可再次 `connect`，不会残留任何上一轮状态。
pub struct SecureConnection<P: SecurityProvider, T: Connection = TcpConnection> {
    provider: P,
    socket: T,
    config: SecureTransportConfig,
    session: Option<Session<P>>,
    closed: bool,
}

impl<P: SecurityProvider> SecureConnection<P, TcpConnection> {
    /// 以默认套接字配置创建。
    pub fn new(provider: P) -> Self {
        Self::with_socket(provider, TcpConnection::new(), SecureTransportConfig::default())
    }
}

impl<P: SecurityProvider, T: Connection> SecureConnection<P, T> {
    pub fn with_socket(provider: P, socket: T, config: SecureTransportConfig) -> Self {
        Self {
            provider,
            socket,
            config,
            session: None,
            closed: false,
        }
    }

    /// 当前平台是否具备可用的安全原语。
    pub fn valid(&self) -> bool {
        self.provider.is_available()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn socket(&self) -> &T {
        &self.socket
    }

    pub fn config(&self) -> &SecureTransportConfig {
        &self.config
    }

    pub fn is_established(&self) -> bool {
        self.session.is_some()
    }

    /// 已解密但尚未交付的明文字节数。
    pub fn pending_plaintext(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.codec.pending_plaintext())
    }

    /// 已读入但尚未解密的密文字节数。
    pub fn pending_ciphertext(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.codec.pending_ciphertext())
    }

    fn establish(&mut self, host: &str, port: u16) -> Result<Session<P>, TransportError> {
        self.socket.connect(host, port)?;
        let established = Negotiator::new(&self.provider, &self.config).negotiate(&mut self.socket, host)?;
        let codec = RecordCodec::new(established.context, self.config.limits, &established.leftover)?;
        tracing::info!(
            provider = self.provider.name(),
            host,
            port,
            rounds = established.rounds,
            max_message = codec.max_message(),
            "secure connection established"
        );
        Ok(Session {
            codec,
            _credentials: established.credentials,
        })
    }

    fn record_failure_as_eof(result: Result<usize, TransportError>, op: &'static str) -> Result<usize, TransportError> {
        match result {
            Err(err) if err.kind() == ErrorKind::RecordFailure => {
                tracing::warn!(op, code = err.code(), error = %err, "secure record failure");
                Ok(0)
            }
            other => other,
        }
    }
}

impl<P: SecurityProvider, T: Connection> Connection for SecureConnection<P, T> {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        if self.session.is_some() {
            self.close();
        }
        match self.establish(host, port) {
            Ok(session) => {
                self.session = Some(session);
                self.closed = false;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    host,
                    port,
                    kind = err.kind().as_str(),
                    code = err.code(),
                    "secure connect failed"
                );
                self.socket.close();
                Err(err)
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some(session) = self.session.as_mut() else {
            return if self.closed { Ok(0) } else { Err(error::not_connected()) };
        };
        let result = session.codec.read(&mut self.socket, buf);
        Self::record_failure_as_eof(result, "read")
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let Some(session) = self.session.as_mut() else {
            return Err(error::not_connected());
        };
        let result = session.codec.write(&mut self.socket, buf);
        Self::record_failure_as_eof(result, "write")
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!(provider = self.provider.name(), "secure session released");
        }
        self.socket.close();
        self.closed = true;
    }

    fn max_write_len(&self) -> Option<usize> {
        self.session.as_ref().map(|session| session.codec.max_message())
    }
}

#[cfg(test)]
mod tests {
    use spark_transport::Connection;
    use spark_transport::memory::MemoryConnection;
    use tracing_test::traced_test;

    use super::SecureConnection;
    use crate::config::SecureTransportConfig;
    use crate::loopback::{HEADER_LEN, LoopbackPeer, LoopbackProvider, SharedLoopbackPeer};

    #[test]
    #[traced_test]
    fn record_failure_is_logged_and_read_as_end_of_stream() {
        let peer = SharedLoopbackPeer::new(LoopbackPeer::new("unit"));
        let socket = MemoryConnection::new().with_peer(peer.clone());
        let handle = socket.handle();
        let mut conn =
            SecureConnection::with_socket(LoopbackProvider::new("unit"), socket, SecureTransportConfig::default());
        conn.connect("unit.test", 443).expect("handshake");
        assert!(logs_contain("secure connection established"));

        let mut wire = peer.lock().seal(b"corrupted").expect("sealed");
        wire[HEADER_LEN] ^= 0x01;
        handle.push_inbound(wire);
        assert_eq!(conn.read(&mut [0u8; 32]).expect("mapped to eof"), 0);
        assert!(logs_contain("secure record failure"));
        assert!(logs_contain("spark.transport.sspi.decrypt_failed"));
    }

    #[test]
    #[traced_test]
    fn failed_connect_logs_kind_and_code() {
        let mut conn = SecureConnection::with_socket(
            LoopbackProvider::new("unit"),
            MemoryConnection::new().with_peer(SharedLoopbackPeer::new(LoopbackPeer::new("unit").rejecting())),
            SecureTransportConfig::default(),
        );
        assert!(conn.connect("unit.test", 443).is_err());
        assert!(logs_contain("handshake rejected by security provider"));
        assert!(logs_contain("handshake_failure"));
    }
}
