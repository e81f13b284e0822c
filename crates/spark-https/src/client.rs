use spark_transport::Connection;
use spark_transport_sspi::{SecureConnection, SecurityProvider};
use spark_transport_tcp::TcpConnection;

use crate::config::ClientConfig;
use crate::error::HttpsError;
use crate::message::{Method, Reply, Request};
use crate::response::ResponseReader;
use crate::url::{Scheme, Url};
use crate::wire;

/// 一个可被注册表调度的 HTTPS 后端。
///
/// # 契约（What）
/// - `valid` 只做能力探测，不得产生网络副作用，可被反复调用；
/// - `request` 同步执行一次完整请求，失败以 [`HttpsError`] 返回，不做整体重试。
pub trait HttpsClient: Send + Sync {
    fn name(&self) -> &'static str;

    fn valid(&self) -> bool;

    fn request(&self, request: &Request) -> Result<Reply, HttpsError>;
}

/// 为每次请求创建一条全新连接。
pub trait ConnectionFactory: Send + Sync {
    fn valid(&self) -> bool;

    fn create(&self, config: &ClientConfig) -> Box<dyn Connection>;
}

/// 明文 TCP 连接工厂。
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpFactory;

impl ConnectionFactory for TcpFactory {
    fn valid(&self) -> bool {
        true
    }

    fn create(&self, config: &ClientConfig) -> Box<dyn Connection> {
        Box::new(TcpConnection::with_config(config.socket.clone()))
    }
}

/// 基于安全提供者的连接工厂，底层套接字为 [`TcpConnection`]。
#[derive(Clone, Debug, Default)]
pub struct SecureFactory<P> {
    provider: P,
}

impl<P: SecurityProvider + Clone + 'static> SecureFactory<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P: SecurityProvider + Clone + 'static> ConnectionFactory for SecureFactory<P> {
    fn valid(&self) -> bool {
        self.provider.is_available()
    }

    fn create(&self, config: &ClientConfig) -> Box<dyn Connection> {
        Box::new(SecureConnection::with_socket(
            self.provider.clone(),
            TcpConnection::with_config(config.socket.clone()),
            config.secure.clone(),
        ))
    }
}

/// 在任意 [`Connection`] 之上实现 HTTP/1.1 的客户端。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 明文与安全连接共享同一套请求编码与响应解析，区别只在连接工厂；
/// - 每次请求使用独立连接并发送 `Connection: close`，不维护连接池，
///   因而客户端本身无可变状态，可在线程间共享。
///
/// ## 核心逻辑（How）
/// - 解析 URL 后按方案挑选工厂：`https` 走安全工厂，`http` 走明文工厂；
/// - 请求报文按 `min(write_chunk, max_write_len)` 分片写出，以满足记录层单次写入上限；
/// - 无论成功与否，返回前都会关闭连接。
///
/// ## 契约（What）
/// - `valid()` 等价于安全工厂可用；
/// - 传输层错误原样包裹进 [`HttpsError::Transport`]。
pub struct ConnectionClient {
    name: &'static str,
    plain: Box<dyn ConnectionFactory>,
    secure: Box<dyn ConnectionFactory>,
    config: ClientConfig,
}

impl ConnectionClient {
    /// 以安全提供者构建客户端，明文请求使用 [`TcpFactory`]。
    pub fn new<P: SecurityProvider + Clone + 'static>(provider: P, config: ClientConfig) -> Self {
        let name = provider.name();
        Self::with_factories(name, TcpFactory, SecureFactory::new(provider), config)
    }

    pub fn with_factories(
        name: &'static str,
        plain: impl ConnectionFactory + 'static,
        secure: impl ConnectionFactory + 'static,
        config: ClientConfig,
    ) -> Self {
        Self {
            name,
            plain: Box::new(plain),
            secure: Box::new(secure),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn exchange(&self, conn: &mut dyn Connection, url: &Url, encoded: &[u8], method: Method) -> Result<Reply, HttpsError> {
        conn.connect(url.host(), url.port())?;

        let chunk = conn
            .max_write_len()
            .map_or(self.config.write_chunk, |max| max.min(self.config.write_chunk))
            .max(1);
        for piece in encoded.chunks(chunk) {
            conn.write_all(piece)?;
        }
        tracing::trace!(bytes = encoded.len(), chunk, "http request written");

        ResponseReader::new(conn, self.config.response_limits()).read_reply(method)
    }
}

impl HttpsClient for ConnectionClient {
    fn name(&self) -> &'static str {
        self.name
    }

    fn valid(&self) -> bool {
        self.secure.valid()
    }

    fn request(&self, request: &Request) -> Result<Reply, HttpsError> {
        let url = Url::parse(&request.url)?;
        let method = request.effective_method();
        let encoded = wire::encode_request(request, &url, &self.config.user_agent)?;
        let factory = match url.scheme() {
            Scheme::Https => &self.secure,
            Scheme::Http => &self.plain,
        };
        tracing::debug!(
            client = self.name,
            method = method.as_str(),
            scheme = url.scheme().as_str(),
            host = url.host(),
            port = url.port(),
            "http request"
        );

        let mut conn = factory.create(&self.config);
        let result = self.exchange(conn.as_mut(), &url, &encoded, method);
        conn.close();

        match &result {
            Ok(reply) => tracing::debug!(
                client = self.name,
                status = reply.response_code,
                body_len = reply.body.len(),
                "http request completed"
            ),
            Err(err) => tracing::warn!(
                client = self.name,
                host = url.host(),
                code = err.code(),
                error = %err,
                "http request failed"
            ),
        }
        result
    }
}
