#![doc = r#"
# spark-transport-tcp

## 设计动机（Why）
- **定位**：提供阻塞式 TCP 连接，作为系统安全上下文 TLS 的原始字节通道，
  同时承载 `http://` 的明文请求；
- **架构角色**：实现 `spark-transport` 的 [`Connection`](spark_transport::Connection)
  契约，错误统一映射为带稳定错误码的 [`TransportError`](spark_transport::TransportError)。

## 核心契约（What）
- `connect` 解析域名并按顺序尝试地址，成功后应用 [`TcpSocketConfig`]；
- `read`/`write` 为单次阻塞系统调用，超时由配置决定并以 `Timeout` 分类上报；
- `close` 幂等，关闭后 `read` 恒返回 `Ok(0)`。

## 风险与考量（Trade-offs）
- 阻塞模型没有取消原语，线程能否及时返回完全取决于读写超时配置；
- 多地址场景下逐个串行尝试，单个地址的建连超时会累积。
"#]

mod channel;
mod error;
mod util;

pub use channel::{TcpConnection, TcpSocketConfig};
