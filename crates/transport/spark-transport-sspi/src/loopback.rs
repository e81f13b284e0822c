//! 进程内参考安全提供者：以 TLS 形状的帧格式模拟握手与记录层。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 系统 SChannel 只存在于 Windows，且依赖真实证书；记录层的缓冲、分片、EOF 语义却需要在
//!   任意平台上被确定性地测试。本模块提供与 [`SecurityProvider`] 契约一致的客户端实现
//!   [`LoopbackProvider`]，以及配套的服务端 [`LoopbackPeer`]；
//! - 帧格式沿用 TLS 记录头（类型 + 版本 + 长度，共 5 字节），使“半条记录”“尾随记录”
//!   等边界与真实流量同构。
//!
//! ## 核心逻辑（How）
//! - 握手两轮：客户端发送 `ClientHello`（随机数 + 目标主机名），服务端回 `ServerHello`
//!   （随机数 + 接受标志 + 可选身份），客户端校验身份后派生密钥并发送 `ClientFinished`；
//! - 记录层：SHA-256 计数器模式生成密钥流做异或，尾部附 16 字节 SHA-256 截断校验值；
//! - 关闭通知为类型 `0x15` 的记录，解密后上报 [`DecryptStatus::ContextExpired`]。
//!
//! ## 风险与权衡（Trade-offs）
//! - **不提供任何安全性**：密钥由共享口令与明文随机数派生，仅用于测试与演示；
//! - 提供者通过共享计数器暴露存活的上下文/凭据数量，测试据此断言 RAII 释放。

use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use parking_lot::{Mutex, MutexGuard};
use sha2::{Digest, Sha256};
use spark_transport::memory::MemoryPeer;

use crate::{
    config::CredentialPolicy,
    provider::{
        ContextAttributes, DecryptStatus, NegotiationStatus, NegotiationStep, ProviderStatus,
        SealedLengths, SecurityContext, SecurityProvider, StreamSizes,
    },
};

/// 记录头长度（类型 1 + 版本 2 + 长度 2）。
pub const HEADER_LEN: usize = 5;
/// 记录尾部校验值长度。
pub const TRAILER_LEN: usize = 16;
/// 默认单条记录最大明文。
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024;

const CONTENT_ALERT: u8 = 0x15;
const CONTENT_HANDSHAKE: u8 = 0x16;
const CONTENT_APPLICATION: u8 = 0x17;
const VERSION: [u8; 2] = [0x03, 0x03];
const RANDOM_LEN: usize = 16;
const VERIFY_LEN: usize = 32;
const CLOSE_NOTIFY: [u8; 2] = [0x01, 0x00];

const CLIENT_HELLO: &[u8; 4] = b"LBCH";
const SERVER_HELLO: &[u8; 4] = b"LBSH";
const CLIENT_FINISHED: &[u8; 4] = b"LBCF";

const CLIENT_TO_SERVER: u8 = b'C';
const SERVER_TO_CLIENT: u8 = b'S';

/// 参考提供者使用的状态码，取值与 SSPI 同名错误一致，便于日志对照。
pub mod status {
    use crate::provider::ProviderStatus;

    pub const INVALID_HANDLE: ProviderStatus = ProviderStatus(0x8009_0301_u32 as i32);
    pub const UNSUPPORTED_FUNCTION: ProviderStatus = ProviderStatus(0x8009_0302_u32 as i32);
    pub const MESSAGE_ALTERED: ProviderStatus = ProviderStatus(0x8009_030F_u32 as i32);
    pub const WRONG_PRINCIPAL: ProviderStatus = ProviderStatus(0x8009_0322_u32 as i32);
    pub const ILLEGAL_MESSAGE: ProviderStatus = ProviderStatus(0x8009_0326_u32 as i32);
    pub const ALGORITHM_MISMATCH: ProviderStatus = ProviderStatus(0x8009_0331_u32 as i32);
}

/// 客户端参考提供者。
#[derive(Clone, Debug)]
pub struct LoopbackProvider {
    secret: Arc<[u8]>,
    max_message: usize,
    available: bool,
    weak_protection: bool,
    live_contexts: Arc<AtomicUsize>,
    live_credentials: Arc<AtomicUsize>,
    nonce: Arc<AtomicU64>,
}

impl LoopbackProvider {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            max_message: DEFAULT_MAX_MESSAGE,
            available: true,
            weak_protection: false,
            live_contexts: Arc::new(AtomicUsize::new(0)),
            live_credentials: Arc::new(AtomicUsize::new(0)),
            nonce: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 设置单条记录最大明文；上限受 16 位长度字段约束。
    pub fn with_max_message(mut self, max_message: usize) -> Self {
        self.max_message = max_message.clamp(1, u16::MAX as usize - TRAILER_LEN);
        self
    }

    /// 模拟当前平台没有可用的安全包。
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// 令协商出的上下文不具备机密性。
    pub fn with_weak_protection(mut self) -> Self {
        self.weak_protection = true;
        self
    }

    /// 当前存活的安全上下文数量。
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }

    pub fn live_credentials(&self) -> usize {
        self.live_credentials.load(Ordering::SeqCst)
    }

    fn next_random(&self, label: &[u8]) -> [u8; RANDOM_LEN] {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        random_from(&self.secret, label, nonce)
    }
}

/// 参考凭据：仅承担存活计数。
#[derive(Debug)]
pub struct LoopbackCredentials {
    tracker: Arc<AtomicUsize>,
}

impl Drop for LoopbackCredentials {
    fn drop(&mut self) {
        self.tracker.fetch_sub(1, Ordering::SeqCst);
    }
}

enum ContextPhase {
    AwaitServerHello { client_random: [u8; RANDOM_LEN] },
    Established(RecordKeys),
}

/// 参考安全上下文。
pub struct LoopbackContext {
    phase: ContextPhase,
    max_message: usize,
    weak_protection: bool,
    tracker: Arc<AtomicUsize>,
}

impl Drop for LoopbackContext {
    fn drop(&mut self) {
        self.tracker.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SecurityProvider for LoopbackProvider {
    type Credentials = LoopbackCredentials;
    type Context = LoopbackContext;

    fn name(&self) -> &'static str {
        "loopback"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn acquire_credentials(&self, policy: &CredentialPolicy) -> Result<LoopbackCredentials, ProviderStatus> {
        if !self.available || !policy.protocols.any_enabled() {
            return Err(status::UNSUPPORTED_FUNCTION);
        }
        self.live_credentials.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackCredentials {
            tracker: Arc::clone(&self.live_credentials),
        })
    }

    fn initialize(
        &self,
        _credentials: &mut LoopbackCredentials,
        context: &mut Option<LoopbackContext>,
        target: &str,
        input: &[u8],
    ) -> NegotiationStep {
        let Some(ctx) = context.as_mut() else {
            let client_random = self.next_random(b"client");
            self.live_contexts.fetch_add(1, Ordering::SeqCst);
            *context = Some(LoopbackContext {
                phase: ContextPhase::AwaitServerHello { client_random },
                max_message: self.max_message,
                weak_protection: self.weak_protection,
                tracker: Arc::clone(&self.live_contexts),
            });
            let mut body = Vec::with_capacity(4 + RANDOM_LEN + target.len());
            body.extend_from_slice(CLIENT_HELLO);
            body.extend_from_slice(&client_random);
            body.extend_from_slice(target.as_bytes());
            return NegotiationStep::new(
                NegotiationStatus::ContinueNeeded,
                frame(CONTENT_HANDSHAKE, &body),
                input.len(),
            );
        };

        let client_random = match &ctx.phase {
            ContextPhase::Established(_) => {
                return NegotiationStep::new(NegotiationStatus::AlreadyComplete, Vec::new(), input.len());
            }
            ContextPhase::AwaitServerHello { client_random } => *client_random,
        };
        let Some(len) = frame_len(input).filter(|len| *len <= input.len()) else {
            return NegotiationStep::new(NegotiationStatus::IncompleteMessage, Vec::new(), input.len());
        };
        let failed = |code| NegotiationStep::new(NegotiationStatus::Failed(code), Vec::new(), 0);
        let body = &input[HEADER_LEN..len];
        if input[0] != CONTENT_HANDSHAKE
            || body.len() < 4 + RANDOM_LEN + 1
            || &body[..4] != SERVER_HELLO
        {
            return failed(status::ILLEGAL_MESSAGE);
        }
        let mut server_random = [0u8; RANDOM_LEN];
        server_random.copy_from_slice(&body[4..4 + RANDOM_LEN]);
        if body[4 + RANDOM_LEN] != 0 {
            return failed(status::ALGORITHM_MISMATCH);
        }
        let identity = &body[4 + RANDOM_LEN + 1..];
        if !identity.is_empty() && identity != target.as_bytes() {
            return failed(status::WRONG_PRINCIPAL);
        }

        let key = derive_key(&self.secret, &client_random, &server_random);
        let mut finished = Vec::with_capacity(4 + VERIFY_LEN);
        finished.extend_from_slice(CLIENT_FINISHED);
        finished.extend_from_slice(&finished_verify(&key, &client_random, &server_random));
        ctx.phase = ContextPhase::Established(RecordKeys::new(key, CLIENT_TO_SERVER, SERVER_TO_CLIENT));
        NegotiationStep::new(
            NegotiationStatus::Complete,
            frame(CONTENT_HANDSHAKE, &finished),
            input.len() - len,
        )
    }
}

impl SecurityContext for LoopbackContext {
    fn attributes(&self) -> ContextAttributes {
        match self.phase {
            ContextPhase::Established(_) => ContextAttributes {
                confidentiality: !self.weak_protection,
                integrity: true,
            },
            ContextPhase::AwaitServerHello { .. } => ContextAttributes::default(),
        }
    }

    fn stream_sizes(&self) -> Result<StreamSizes, ProviderStatus> {
        match self.phase {
            ContextPhase::Established(_) => Ok(StreamSizes {
                header: HEADER_LEN,
                trailer: TRAILER_LEN,
                max_message: self.max_message,
            }),
            ContextPhase::AwaitServerHello { .. } => Err(status::INVALID_HANDLE),
        }
    }

    fn encrypt(
        &mut self,
        record: &mut [u8],
        sizes: &StreamSizes,
        payload_len: usize,
    ) -> Result<SealedLengths, ProviderStatus> {
        let ContextPhase::Established(keys) = &mut self.phase else {
            return Err(status::INVALID_HANDLE);
        };
        if sizes.header != HEADER_LEN
            || sizes.trailer != TRAILER_LEN
            || payload_len > self.max_message
            || record.len() < HEADER_LEN + payload_len + TRAILER_LEN
        {
            return Err(status::ILLEGAL_MESSAGE);
        }
        keys.seal_in_place(CONTENT_APPLICATION, &mut record[..HEADER_LEN + payload_len + TRAILER_LEN]);
        Ok(SealedLengths {
            header: HEADER_LEN,
            data: payload_len,
            trailer: TRAILER_LEN,
        })
    }

    fn decrypt(&mut self, buffer: &mut [u8]) -> DecryptStatus {
        let ContextPhase::Established(keys) = &mut self.phase else {
            return DecryptStatus::Failed(status::INVALID_HANDLE);
        };
        match keys.open_in_place(buffer) {
            Opened::Incomplete => DecryptStatus::IncompleteMessage,
            Opened::Invalid(code) => DecryptStatus::Failed(code),
            Opened::Record {
                content_type: CONTENT_APPLICATION,
                body,
                consumed,
            } => DecryptStatus::Data {
                data: body,
                extra: buffer.len() - consumed,
            },
            Opened::Record {
                content_type: CONTENT_ALERT,
                body,
                ..
            } if buffer[body.clone()] == CLOSE_NOTIFY => DecryptStatus::ContextExpired,
            Opened::Record { .. } => DecryptStatus::Failed(status::ILLEGAL_MESSAGE),
        }
    }
}

enum PeerPhase {
    AwaitClientHello,
    AwaitClientFinished { keys: RecordKeys, verify: [u8; VERIFY_LEN] },
    Established(RecordKeys),
    Rejected,
    Failed,
}

/// 与 [`LoopbackProvider`] 配对的服务端。
///
/// `feed` 接收客户端写出的字节，返回需要回送的若干“飞行批次”；每个批次在内存连接中
/// 作为一个独立分片交付。
pub struct LoopbackPeer {
    secret: Arc<[u8]>,
    identity: Option<String>,
    reject: bool,
    early_data: Option<Vec<u8>>,
    echo_fragment: Option<usize>,
    phase: PeerPhase,
    inbound: Vec<u8>,
    received: Vec<u8>,
    hostname: Option<String>,
    client_closed: bool,
    nonce: u64,
}

impl LoopbackPeer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            identity: None,
            reject: false,
            early_data: None,
            echo_fragment: None,
            phase: PeerPhase::AwaitClientHello,
            inbound: Vec::new(),
            received: Vec::new(),
            hostname: None,
            client_closed: false,
            nonce: 0,
        }
    }

    /// 在 `ServerHello` 中声明身份，客户端会与目标主机名比对。
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// 拒绝任何握手。
    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    /// 紧随 `ServerHello` 在同一批次中发送一条应用记录。
    pub fn with_early_data(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.early_data = Some(payload.into());
        self
    }

    /// 回显收到的应用数据，按 `fragment` 字节切分为多条记录。
    pub fn with_echo(mut self, fragment: usize) -> Self {
        self.echo_fragment = Some(fragment.max(1));
        self
    }

    pub fn is_established(&self) -> bool {
        matches!(self.phase, PeerPhase::Established(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.phase, PeerPhase::Failed | PeerPhase::Rejected)
    }

    /// 客户端在 `ClientHello` 中声明的主机名。
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn client_closed(&self) -> bool {
        self.client_closed
    }

    pub fn received(&self) -> &[u8] {
        &self.received
    }

    pub fn take_received(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.received)
    }

    /// 封装一条发往客户端的应用记录；握手未完成时返回 `None`。
    pub fn seal(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        let keys = self.sending_keys()?;
        Some(keys.seal(CONTENT_APPLICATION, payload))
    }

    /// 封装关闭通知。
    pub fn seal_close_notify(&mut self) -> Option<Vec<u8>> {
        let keys = self.sending_keys()?;
        Some(keys.seal(CONTENT_ALERT, &CLOSE_NOTIFY))
    }

    fn sending_keys(&mut self) -> Option<&mut RecordKeys> {
        match &mut self.phase {
            PeerPhase::Established(keys) | PeerPhase::AwaitClientFinished { keys, .. } => Some(keys),
            _ => None,
        }
    }

    /// 处理客户端写出的字节，返回需要回送的批次。
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.inbound.extend_from_slice(data);
        let mut flights = Vec::new();
        while let Some(len) = frame_len(&self.inbound).filter(|len| *len <= self.inbound.len()) {
            let mut message: Vec<u8> = self.inbound.drain(..len).collect();
            self.process(&mut message, &mut flights);
        }
        flights
    }

    fn process(&mut self, message: &mut [u8], flights: &mut Vec<Vec<u8>>) {
        match std::mem::replace(&mut self.phase, PeerPhase::Failed) {
            PeerPhase::AwaitClientHello => self.on_client_hello(message, flights),
            PeerPhase::AwaitClientFinished { keys, verify } => {
                let body = &message[HEADER_LEN..];
                if message[0] == CONTENT_HANDSHAKE
                    && body.len() == 4 + VERIFY_LEN
                    && &body[..4] == CLIENT_FINISHED
                    && body[4..] == verify
                {
                    self.phase = PeerPhase::Established(keys);
                }
            }
            PeerPhase::Established(mut keys) => {
                match keys.open_in_place(message) {
                    Opened::Record {
                        content_type: CONTENT_APPLICATION,
                        body,
                        ..
                    } => {
                        let payload = message[body].to_vec();
                        if let Some(fragment) = self.echo_fragment {
                            for chunk in payload.chunks(fragment) {
                                flights.push(keys.seal(CONTENT_APPLICATION, chunk));
                            }
                        }
                        self.received.extend_from_slice(&payload);
                    }
                    Opened::Record {
                        content_type: CONTENT_ALERT,
                        ..
                    } => self.client_closed = true,
                    _ => return,
                }
                self.phase = PeerPhase::Established(keys);
            }
            PeerPhase::Rejected => self.phase = PeerPhase::Rejected,
            PeerPhase::Failed => {}
        }
    }

    fn on_client_hello(&mut self, message: &[u8], flights: &mut Vec<Vec<u8>>) {
        let body = &message[HEADER_LEN..];
        if message[0] != CONTENT_HANDSHAKE || body.len() < 4 + RANDOM_LEN || &body[..4] != CLIENT_HELLO {
            return;
        }
        let mut client_random = [0u8; RANDOM_LEN];
        client_random.copy_from_slice(&body[4..4 + RANDOM_LEN]);
        self.hostname = Some(String::from_utf8_lossy(&body[4 + RANDOM_LEN..]).into_owned());
        self.nonce += 1;
        let server_random = random_from(&self.secret, b"server", self.nonce);

        let mut hello = Vec::with_capacity(4 + RANDOM_LEN + 1);
        hello.extend_from_slice(SERVER_HELLO);
        hello.extend_from_slice(&server_random);
        if self.reject {
            hello.push(1);
            flights.push(frame(CONTENT_HANDSHAKE, &hello));
            self.phase = PeerPhase::Rejected;
            return;
        }
        hello.push(0);
        if let Some(identity) = &self.identity {
            hello.extend_from_slice(identity.as_bytes());
        }
        let key = derive_key(&self.secret, &client_random, &server_random);
        let verify = finished_verify(&key, &client_random, &server_random);
        let mut keys = RecordKeys::new(key, SERVER_TO_CLIENT, CLIENT_TO_SERVER);
        let mut flight = frame(CONTENT_HANDSHAKE, &hello);
        if let Some(early) = &self.early_data {
            flight.extend_from_slice(&keys.seal(CONTENT_APPLICATION, early));
        }
        flights.push(flight);
        self.phase = PeerPhase::AwaitClientFinished { keys, verify };
    }
}

/// 线程间共享的 [`LoopbackPeer`]，可直接挂载到内存连接上。
#[derive(Clone)]
pub struct SharedLoopbackPeer {
    inner: Arc<Mutex<LoopbackPeer>>,
}

impl SharedLoopbackPeer {
    pub fn new(peer: LoopbackPeer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(peer)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, LoopbackPeer> {
        self.inner.lock()
    }
}

impl MemoryPeer for SharedLoopbackPeer {
    fn on_client_bytes(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.inner.lock().feed(data)
    }
}

/// 单向记录密钥与序列号。
struct RecordKeys {
    key: [u8; 32],
    outbound: u8,
    inbound: u8,
    send_seq: u64,
    recv_seq: u64,
}

enum Opened {
    Incomplete,
    Invalid(ProviderStatus),
    Record {
        content_type: u8,
        body: std::ops::Range<usize>,
        consumed: usize,
    },
}

impl RecordKeys {
    fn new(key: [u8; 32], outbound: u8, inbound: u8) -> Self {
        Self {
            key,
            outbound,
            inbound,
            send_seq: 0,
            recv_seq: 0,
        }
    }

    fn seal(&mut self, content_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut record = vec![0u8; HEADER_LEN + payload.len() + TRAILER_LEN];
        record[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
        self.seal_in_place(content_type, &mut record);
        record
    }

    /// `record` 恰为 `[header | payload | trailer]`。
    fn seal_in_place(&mut self, content_type: u8, record: &mut [u8]) {
        let body_len = record.len() - HEADER_LEN;
        let payload_end = record.len() - TRAILER_LEN;
        record[0] = content_type;
        record[1..3].copy_from_slice(&VERSION);
        record[3..5].copy_from_slice(&(body_len as u16).to_be_bytes());
        apply_keystream(&self.key, self.outbound, self.send_seq, &mut record[HEADER_LEN..payload_end]);
        let mac = record_mac(&self.key, self.outbound, self.send_seq, &record[..payload_end]);
        record[payload_end..].copy_from_slice(&mac);
        self.send_seq += 1;
    }

    fn open_in_place(&mut self, buffer: &mut [u8]) -> Opened {
        let Some(len) = frame_len(buffer) else {
            return Opened::Incomplete;
        };
        if buffer.len() < len {
            return Opened::Incomplete;
        }
        if len < HEADER_LEN + TRAILER_LEN || buffer[1..3] != VERSION {
            return Opened::Invalid(status::ILLEGAL_MESSAGE);
        }
        let payload_end = len - TRAILER_LEN;
        let expected = record_mac(&self.key, self.inbound, self.recv_seq, &buffer[..payload_end]);
        if buffer[payload_end..len] != expected {
            return Opened::Invalid(status::MESSAGE_ALTERED);
        }
        apply_keystream(&self.key, self.inbound, self.recv_seq, &mut buffer[HEADER_LEN..payload_end]);
        self.recv_seq += 1;
        Opened::Record {
            content_type: buffer[0],
            body: HEADER_LEN..payload_end,
            consumed: len,
        }
    }
}

fn frame(content_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.push(content_type);
    out.extend_from_slice(&VERSION);
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// 帧的完整长度（含头部）；头部尚未收齐时返回 `None`。
fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    Some(HEADER_LEN + u16::from_be_bytes([buf[3], buf[4]]) as usize)
}

fn random_from(secret: &[u8], label: &[u8], nonce: u64) -> [u8; RANDOM_LEN] {
    let digest = Sha256::new()
        .chain_update(b"spark-loopback-random")
        .chain_update(secret)
        .chain_update(label)
        .chain_update(nonce.to_be_bytes())
        .finalize();
    let mut out = [0u8; RANDOM_LEN];
    out.copy_from_slice(&digest[..RANDOM_LEN]);
    out
}

fn derive_key(secret: &[u8], client_random: &[u8], server_random: &[u8]) -> [u8; 32] {
    let digest = Sha256::new()
        .chain_update(b"spark-loopback-key")
        .chain_update(secret)
        .chain_update(client_random)
        .chain_update(server_random)
        .finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

fn finished_verify(key: &[u8; 32], client_random: &[u8], server_random: &[u8]) -> [u8; VERIFY_LEN] {
    let digest = Sha256::new()
        .chain_update(b"client finished")
        .chain_update(key)
        .chain_update(client_random)
        .chain_update(server_random)
        .finalize();
    let mut verify = [0u8; VERIFY_LEN];
    verify.copy_from_slice(&digest);
    verify
}

fn apply_keystream(key: &[u8; 32], direction: u8, seq: u64, data: &mut [u8]) {
    for (index, chunk) in data.chunks_mut(32).enumerate() {
        let block = Sha256::new()
            .chain_update(key)
            .chain_update([direction])
            .chain_update(seq.to_be_bytes())
            .chain_update((index as u32).to_be_bytes())
            .finalize();
        for (byte, pad) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= pad;
        }
    }
}

fn record_mac(key: &[u8; 32], direction: u8, seq: u64, authenticated: &[u8]) -> [u8; TRAILER_LEN] {
    let digest = Sha256::new()
        .chain_update(b"spark-loopback-mac")
        .chain_update(key)
        .chain_update([direction])
        .chain_update(seq.to_be_bytes())
        .chain_update(authenticated)
        .finalize();
    let mut mac = [0u8; TRAILER_LEN];
    mac.copy_from_slice(&digest[..TRAILER_LEN]);
    mac
}
