use spark_transport::{Connection, TransportError};

use crate::{
    config::SecureTransportConfig,
    error::{self, CREDENTIALS, HANDSHAKE, HANDSHAKE_EOF, PROTECTION},
    provider::{NegotiationStatus, SecurityContext, SecurityProvider},
};

/// 握手状态机的阶段，仅用于日志与测试观测。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// 尚未调用过原语。
    Start,
    /// 已发送首个令牌，正在与对端交换令牌。
    Exchanging,
    /// 原语报告输入不完整，等待补读。
    AwaitingInput,
    Complete,
    Failed,
}

/// 握手成功后移交给记录层的全部产物。
///
/// 字段声明顺序即释放顺序：先释放上下文，再释放凭据。
pub struct Established<P: SecurityProvider> {
    pub context: P::Context,
    pub credentials: P::Credentials,
    /// 最后一个令牌之后已读入、但属于首条应用记录的字节。
    pub leftover: Vec<u8>,
    pub rounds: usize,
}

/// 客户端 TLS 握手驱动器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 系统原语只负责“给定输入令牌，产出输出令牌与状态”，何时读、读多少、何时发送、
///   失败后如何清理都由调用方决定；本类型把这套调用约定固化为一个显式循环；
/// - 失败路径上部分创建的上下文与凭据都是局部值，任何 `return` 都会按 RAII 释放。
///
/// ## 核心逻辑（How）
/// 1. 以 [`CredentialPolicy`](crate::config::CredentialPolicy) 获取凭据；
/// 2. 循环调用 `initialize`：
///    - `ContinueNeeded`：发送令牌，保留原语未消费的尾部字节，再从套接字补读一块；
///    - `IncompleteMessage`：保留全部输入，补读后重试；
///    - `Complete`：发送最终令牌（若有），保留尾部字节并退出；
///    - `AlreadyComplete`：直接退出；
///    - `Failed`：记录状态码并以 `HandshakeFailure` 返回；
/// 3. 校验上下文同时具备机密性与完整性。
///
/// ## 契约（What）
/// - **前置条件**：`socket` 已连接；
/// - **后置条件**：成功时返回的 `leftover` 必须作为记录层的初始密文，否则对端紧随
///   握手发送的首条记录会丢失；
/// - 补读返回 0 字节视为对端提前关闭，以 `HandshakeFailure` 结束。
///
/// ## 风险与权衡（Trade-offs）
/// - 轮次没有计数上限，依赖套接字读超时终止沉默的对端；
/// - 握手阶段的套接字错误原样透传，保留其 `TransportFailure`/`Timeout` 分类。
pub struct Negotiator<'a, P: SecurityProvider> {
    provider: &'a P,
    config: &'a SecureTransportConfig,
    state: HandshakeState,
}

impl<'a, P: SecurityProvider> Negotiator<'a, P> {
    pub fn new(provider: &'a P, config: &'a SecureTransportConfig) -> Self {
        Self {
            provider,
            config,
            state: HandshakeState::Start,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// 在已连接的 `socket` 上完成握手。
    pub fn negotiate<T>(&mut self, socket: &mut T, target: &str) -> Result<Established<P>, TransportError>
    where
        T: Connection + ?Sized,
    {
        let result = self.drive(socket, target);
        if result.is_err() {
            self.transition(HandshakeState::Failed);
        }
        result
    }

    fn drive<T>(&mut self, socket: &mut T, target: &str) -> Result<Established<P>, TransportError>
    where
        T: Connection + ?Sized,
    {
        let mut credentials = self
            .provider
            .acquire_credentials(&self.config.credentials)
            .map_err(|status| {
                tracing::warn!(provider = self.provider.name(), %status, "acquire credentials failed");
                error::handshake_error(CREDENTIALS, Some(status))
            })?;
        let mut context: Option<P::Context> = None;
        let mut inbound: Vec<u8> = Vec::new();
        let mut rounds = 0usize;

        loop {
            rounds += 1;
            let step = self
                .provider
                .initialize(&mut credentials, &mut context, target, &inbound);
            tracing::debug!(
                provider = self.provider.name(),
                target,
                round = rounds,
                status = ?step.status,
                token_len = step.token.len(),
                unconsumed = step.unconsumed,
                "handshake round"
            );
            match step.status {
                NegotiationStatus::ContinueNeeded => {
                    self.transition(HandshakeState::Exchanging);
                    send_token(socket, &step.token)?;
                    retain_tail(&mut inbound, step.unconsumed);
                    self.read_more(socket, &mut inbound)?;
                }
                NegotiationStatus::IncompleteMessage => {
                    self.transition(HandshakeState::AwaitingInput);
                    self.read_more(socket, &mut inbound)?;
                }
                NegotiationStatus::Complete => {
                    send_token(socket, &step.token)?;
                    retain_tail(&mut inbound, step.unconsumed);
                    break;
                }
                NegotiationStatus::AlreadyComplete => {
                    retain_tail(&mut inbound, step.unconsumed);
                    break;
                }
                NegotiationStatus::Failed(status) => {
                    tracing::warn!(
                        provider = self.provider.name(),
                        target,
                        round = rounds,
                        %status,
                        "handshake rejected by security provider"
                    );
                    return Err(error::handshake_error(HANDSHAKE, Some(status)));
                }
            }
        }

        let Some(context) = context else {
            return Err(error::handshake_error(HANDSHAKE, None));
        };
        let attributes = context.attributes();
        if !(attributes.confidentiality && attributes.integrity) {
            tracing::warn!(?attributes, "negotiated context lacks required protection");
            return Err(error::handshake_error(PROTECTION, None));
        }
        self.transition(HandshakeState::Complete);
        tracing::debug!(
            provider = self.provider.name(),
            target,
            rounds,
            leftover = inbound.len(),
            "handshake complete"
        );
        Ok(Established {
            context,
            credentials,
            leftover: inbound,
            rounds,
        })
    }

    fn read_more<T>(&self, socket: &mut T, inbound: &mut Vec<u8>) -> Result<(), TransportError>
    where
        T: Connection + ?Sized,
    {
        let start = inbound.len();
        inbound.resize(start + self.config.handshake_read_chunk.max(1), 0);
        let count = match socket.read(&mut inbound[start..]) {
            Ok(count) => count,
            Err(err) => {
                inbound.truncate(start);
                return Err(err);
            }
        };
        inbound.truncate(start + count);
        if count == 0 {
            return Err(error::handshake_error(HANDSHAKE_EOF, None));
        }
        Ok(())
    }

    fn transition(&mut self, next: HandshakeState) {
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "handshake state");
            self.state = next;
        }
    }
}

fn send_token<T>(socket: &mut T, token: &[u8]) -> Result<(), TransportError>
where
    T: Connection + ?Sized,
{
    if token.is_empty() {
        return Ok(());
    }
    socket.write_all(token)
}

/// 只保留输入尾部 `unconsumed` 个字节。
fn retain_tail(inbound: &mut Vec<u8>, unconsumed: usize) {
    let keep = unconsumed.min(inbound.len());
    let consumed = inbound.len() - keep;
    inbound.drain(..consumed);
}
