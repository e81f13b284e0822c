#![deny(unsafe_code)]
#![doc = "spark-transport: 阻塞式传输连接的统一契约层。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：为明文 TCP、系统安全上下文 TLS 及内存测试通道提供共同语言，HTTPS 门面按契约调度而无需感知实现。"]
#![doc = "- **What**：定义 [`Connection`] trait、统一错误 [`TransportError`] 与分类 [`ErrorKind`]，并提供脚本化的 [`memory::MemoryConnection`]。"]
#![doc = "- **How**：所有操作同步阻塞，连接以 `&mut self` 串行访问；超时交由具体实现的套接字配置负责。"]

pub mod connection;
pub mod error;
pub mod memory;

pub use connection::Connection;
pub use error::{ErrorKind, TransportError};
