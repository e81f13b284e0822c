use std::ops::Range;

use crate::config::CredentialPolicy;

/// 平台安全原语返回的原始状态码（如 SSPI 的 `SECURITY_STATUS`）。
///
/// 仅用于日志与错误来源展示，语义判断一律通过 [`NegotiationStatus`]/[`DecryptStatus`] 完成。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[error("security provider status {0:#010x}")]
pub struct ProviderStatus(pub i32);

/// 单轮握手协商的结果分类。
///
/// # 契约（What）
/// - `ContinueNeeded`：发送本轮输出令牌，再从对端读取更多字节后进入下一轮；
/// - `Complete`：协商成功，但仍需把本轮输出令牌发给对端；
/// - `AlreadyComplete`：上下文早已建立，无需任何 I/O；
/// - `IncompleteMessage`：输入不足一个完整令牌，需补读后以相同状态重试；
/// - `Failed`：不可恢复，调用方必须释放部分创建的上下文。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationStatus {
    ContinueNeeded,
    Complete,
    AlreadyComplete,
    IncompleteMessage,
    Failed(ProviderStatus),
}

/// 一轮协商的完整输出。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiationStep {
    pub status: NegotiationStatus,
    /// 需要发给对端的出站令牌，可能为空。
    pub token: Vec<u8>,
    /// 输入尾部未被原语消费的字节数（属于下一条消息）。
    pub unconsumed: usize,
}

impl NegotiationStep {
    pub fn new(status: NegotiationStatus, token: Vec<u8>, unconsumed: usize) -> Self {
        Self {
            status,
            token,
            unconsumed,
        }
    }
}

/// 协商完成后上下文提供的保护能力。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContextAttributes {
    pub confidentiality: bool,
    pub integrity: bool,
}

/// 记录层尺寸：头部、尾部开销与单条记录可承载的最大明文。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSizes {
    pub header: usize,
    pub trailer: usize,
    pub max_message: usize,
}

impl StreamSizes {
    /// 一条满载记录在线路上的最大字节数。
    pub fn max_record_len(&self) -> usize {
        self.header + self.max_message + self.trailer
    }
}

/// 加密原语实际填充的三段长度。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SealedLengths {
    pub header: usize,
    pub data: usize,
    pub trailer: usize,
}

impl SealedLengths {
    pub fn total(&self) -> usize {
        self.header + self.data + self.trailer
    }
}

/// 原地解密的结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecryptStatus {
    /// 成功：`data` 为输入缓冲内明文所在区间，`extra` 为尾部属于下一条记录的字节数。
    Data { data: Range<usize>, extra: usize },
    /// 输入不足一条完整记录。
    IncompleteMessage,
    /// 对端发送了关闭通知，上下文已失效。
    ContextExpired,
    /// 对端请求重新协商。
    Renegotiate,
    Failed(ProviderStatus),
}

/// 已建立的安全上下文：持有协商得到的密钥与序列号，负责记录的加解密。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 平台原语返回的上下文是不透明句柄，必须由唯一所有者在生命周期结束时释放一次；
///   以 Rust 所有权表达：实现者在 `Drop` 中释放句柄，值不可 `Clone`；
/// - 记录层只依赖本 trait，便于在系统 SChannel 与进程内参考实现之间替换。
///
/// ## 契约（What）
/// - `attributes`：协商结果是否同时具备机密性与完整性；
/// - `stream_sizes`：记录头/尾开销与最大明文长度，记录层据此分配缓冲；
/// - `encrypt`：`record` 布局为 `[header | payload | trailer]`，其中 `payload` 已位于
///   `sizes.header..sizes.header + payload_len`；返回各段实际填充长度；
/// - `decrypt`：原地解密 `buffer`，返回明文区间与尾随字节数，或“不完整”等状态。
pub trait SecurityContext: Send {
    fn attributes(&self) -> ContextAttributes;

    fn stream_sizes(&self) -> Result<StreamSizes, ProviderStatus>;

    fn encrypt(
        &mut self,
        record: &mut [u8],
        sizes: &StreamSizes,
        payload_len: usize,
    ) -> Result<SealedLengths, ProviderStatus>;

    fn decrypt(&mut self, buffer: &mut [u8]) -> DecryptStatus;
}

/// 平台 TLS 协商原语的抽象。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“获取凭据 → 多轮初始化上下文”这一系统原语的调用约定收敛到一个 trait，
///   握手状态机（`Negotiator`）与记录层（`RecordCodec`）不接触任何 FFI；
/// - `is_available` 作为能力探测，供后端选择逻辑在建连前调用。
///
/// ## 契约（What）
/// - `is_available`：无副作用、开销低、不得触发网络 I/O；
/// - `acquire_credentials`：按 [`CredentialPolicy`] 构造凭据，凭据在 `Drop` 时释放；
/// - `initialize`：执行一轮协商。首轮 `context` 为 `None` 且 `input` 为空，原语若创建了
///   上下文需写入 `context`；后续轮次传入对端令牌。返回的 `unconsumed` 不得超过 `input.len()`。
///
/// ## 风险与权衡（Trade-offs）
/// - 失败时 `context` 可能已被填充，调用方负责丢弃它，从而触发 `Drop` 释放；
/// - trait 不规定轮次上限，防止对端无限拖延依赖原始套接字的超时。
pub trait SecurityProvider: Send + Sync {
    type Credentials: Send;
    type Context: SecurityContext;

    /// 用于日志的后端名称。
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    fn acquire_credentials(
        &self,
        policy: &CredentialPolicy,
    ) -> Result<Self::Credentials, ProviderStatus>;

    fn initialize(
        &self,
        credentials: &mut Self::Credentials,
        context: &mut Option<Self::Context>,
        target: &str,
        input: &[u8],
    ) -> NegotiationStep;
}
