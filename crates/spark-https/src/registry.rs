use crate::client::HttpsClient;
use crate::config::ClientConfig;
use crate::error::HttpsError;
use crate::message::{Reply, Request};

/// 按注册顺序做能力探测的后端注册表。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 不同平台可用的安全原语不同，门面在运行时选择第一个可用后端，
///   调用方无需编写平台分支；
/// - 后端一旦被选中，其错误原样返回，不会悄悄换用下一个后端重发请求，
///   以免非幂等请求被重复执行。
///
/// ## 契约（What）
/// - `request` 只调用第一个 `valid()` 为真的后端；
/// - 没有任何可用后端时返回 [`HttpsError::NoApplicableBackend`]。
#[derive(Default)]
pub struct ClientRegistry {
    clients: Vec<Box<dyn HttpsClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前平台的默认后端集合。Windows 上注册 SChannel，其余平台为空。
    #[cfg(windows)]
    pub fn platform_default(config: ClientConfig) -> Self {
        Self::new().with_client(crate::client::ConnectionClient::new(
            spark_transport_sspi::SchannelProvider::new(),
            config,
        ))
    }

    /// 当前平台的默认后端集合。Windows 上注册 SChannel，其余平台为空。
    #[cfg(not(windows))]
    pub fn platform_default(_config: ClientConfig) -> Self {
        Self::new()
    }

    pub fn with_client(mut self, client: impl HttpsClient + 'static) -> Self {
        self.register(client);
        self
    }

    pub fn register(&mut self, client: impl HttpsClient + 'static) {
        self.clients.push(Box::new(client));
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.clients.iter().map(|client| client.name())
    }

    /// 第一个可用后端。
    pub fn select(&self) -> Option<&dyn HttpsClient> {
        self.clients
            .iter()
            .map(|client| client.as_ref())
            .find(|client| client.valid())
    }

    pub fn request(&self, request: &Request) -> Result<Reply, HttpsError> {
        let Some(client) = self.select() else {
            tracing::warn!(registered = self.clients.len(), "no applicable https backend");
            return Err(HttpsError::NoApplicableBackend);
        };
        tracing::debug!(client = client.name(), "https backend selected");
        client.request(request)
    }
}

/// 以平台默认后端与默认配置执行一次请求。
pub fn request(request: &Request) -> Result<Reply, HttpsError> {
    ClientRegistry::platform_default(ClientConfig::default()).request(request)
}
