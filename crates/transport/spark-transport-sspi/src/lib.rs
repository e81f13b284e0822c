#![deny(unsafe_code)]
#![doc = r#"
# spark-transport-sspi

## 设计动机（Why）
- **系统原生 TLS**：借助平台安全原语（Windows SChannel）完成证书校验与加解密，不内置任何 TLS 协议实现；
- **统一契约**：对上暴露与明文 TCP 相同的 [`Connection`](spark_transport::Connection)，HTTPS 门面按 `https://` 与 `http://` 选择实现即可；
- **可测试性**：握手与记录层只依赖 [`SecurityProvider`]/[`SecurityContext`] 两个 trait，配套的 [`loopback`] 参考实现让缓冲与分片语义在任意平台上可被确定性验证。

## 核心契约（What）
- [`Negotiator`]：多轮令牌交换的握手状态机，失败时释放部分创建的上下文；
- [`RecordCodec`]：记录层，维护“已读未解密的密文”与“已解密未交付的明文”两个队列；
- [`SecureConnection`]：组合原始套接字、握手与记录层，把记录层失败折算为 `Ok(0)`；
- [`SecureTransportConfig`]：凭据策略、握手读取块大小与记录层缓冲上限，可由 TOML 反序列化。

## 实现策略（How）
- 解密以显式循环完成，补读次数与累积字节受 [`CodecLimits`] 约束；
- 上下文与凭据以 RAII 管理，`Drop` 即释放底层句柄；
- Windows 专属 FFI 集中在 `schannel` 模块，其余平台仅编译可移植部分。

## 风险与考量（Trade-offs）
- 仅实现客户端；关闭时不发送 TLS 关闭通知；
- 记录层把重新协商请求视为失败，默认凭据策略因此不启用 TLS 1.3。
"#]

mod codec;
mod config;
mod connection;
mod error;
pub mod loopback;
mod negotiator;
mod provider;
#[cfg(windows)]
#[allow(unsafe_code)]
mod schannel;

pub use codec::RecordCodec;
pub use config::{
    CodecLimits, CredentialPolicy, DEFAULT_HANDSHAKE_READ_CHUNK, MAX_TLS_RECORD, ProtocolVersions,
    SecureTransportConfig,
};
pub use connection::SecureConnection;
pub use negotiator::{Established, HandshakeState, Negotiator};
pub use provider::{
    ContextAttributes, DecryptStatus, NegotiationStatus, NegotiationStep, ProviderStatus,
    SealedLengths, SecurityContext, SecurityProvider, StreamSizes,
};
#[cfg(windows)]
pub use schannel::{SchannelContext, SchannelCredentials, SchannelProvider};
