#![deny(unsafe_code)]
#![doc = r#"
# spark-https

## 设计动机（Why）
- **定位**：同步、一次性的 HTTP/1.1 请求门面，`https://` 走系统安全原语建立的
  [`SecureConnection`](spark_transport_sspi::SecureConnection)，`http://` 走明文 TCP；
- **架构角色**：位于传输层之上，只依赖 [`Connection`](spark_transport::Connection) 契约，
  通过 [`ClientRegistry`] 在运行时挑选第一个可用后端。

## 核心契约（What）
- [`Request`] 描述 URL、方法、保序头部与请求体；未指定方法时有请求体取 `POST`，否则取 `GET`；
- [`Reply`] 返回状态码、头部（大小写不敏感查找）与完整响应体；
- 所有失败统一为 [`HttpsError`]，传输层错误保留其稳定错误码。

## 实现策略（How）
- `wire` 负责报文编码与逐行解析，`response` 在连接上补读直到响应边界；
- 每次请求新建连接并在返回前关闭，不做连接复用，也不做整体重试。

## 风险与考量（Trade-offs）
- 不支持重定向、压缩与代理；
- 响应体完整缓存在内存中，上限由 [`ClientConfig::max_response_bytes`] 控制。
"#]

mod client;
mod config;
mod error;
mod message;
mod registry;
mod response;
mod url;
mod wire;

pub use client::{ConnectionClient, ConnectionFactory, HttpsClient, SecureFactory, TcpFactory};
pub use config::{ClientConfig, DEFAULT_USER_AGENT};
pub use error::HttpsError;
pub use message::{Headers, Method, Reply, Request};
pub use registry::{ClientRegistry, request};
pub use url::{Scheme, Url};
