//! 内存连接：以脚本化分片模拟阻塞套接字，供记录层与门面的单元/集成测试复用。

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::error::{ErrorKind, TransportError};

const NOT_CONNECTED_CODE: &str = "spark.transport.memory.not_connected";
const REFUSED_CODE: &str = "spark.transport.memory.connect_refused";

/// 内存对端：观察客户端写出的字节，并给出需要回送的入站分片。
///
/// # 契约（What）
/// - `on_client_bytes` 在每次 `write` 成功后被调用一次，参数为本次写出的字节；
/// - 返回的每个 `Vec<u8>` 作为一个独立分片排入入站队列，一次 `read` 最多消费一个分片，
///   以此模拟 TCP 分段到达。
pub trait MemoryPeer: Send {
    fn on_client_bytes(&mut self, data: &[u8]) -> Vec<Vec<u8>>;
}

#[derive(Default)]
struct MemoryState {
    inbound: VecDeque<Vec<u8>>,
    outbound: Vec<u8>,
    connected: bool,
    closed: bool,
    refuse_connect: bool,
    connect_calls: usize,
    close_calls: usize,
    reads: usize,
    endpoint: Option<(String, u16)>,
    peer: Option<Box<dyn MemoryPeer>>,
}

/// 基于共享状态的内存连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 记录层的缓冲逻辑（半条记录、尾随密文、剩余明文）高度依赖“数据以何种分片到达”，
///   真实 TCP 无法稳定复现；内存连接让测试精确控制每次 `read` 能拿到的字节；
/// - 连接被移交给 `SecureConnection` 之后，测试仍需观测写出的字节与关闭次数，
///   因此状态放在 `Arc<Mutex<..>>` 中，通过 [`MemoryHandle`] 共享。
///
/// ## 逻辑（How）
/// - 入站数据按分片排队，每次 `read` 只从队首分片拷贝，分片耗尽后出队；
/// - 写出字节全部追加到 `outbound`，若配置了 [`MemoryPeer`] 则同步生成回包；
/// - `close` 之后 `read` 恒为 `Ok(0)`，`write` 报错。
///
/// ## 契约（What）
/// - 未连接时读写返回 `Unsupported` 类错误；
/// - `refuse_connect(true)` 令下一次及以后的 `connect` 以 `TransportFailure` 失败。
pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
}

/// [`MemoryConnection`] 的观测与脚本句柄。
#[derive(Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// 以若干入站分片创建连接。
    pub fn with_inbound<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        let connection = Self::new();
        {
            let mut state = connection.state.lock();
            state.inbound.extend(chunks.into_iter().map(Into::into));
        }
        connection
    }

    /// 挂载内存对端。
    pub fn with_peer(self, peer: impl MemoryPeer + 'static) -> Self {
        self.state.lock().peer = Some(Box::new(peer));
        self
    }

    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHandle {
    /// 追加一个入站分片。
    pub fn push_inbound(&self, chunk: impl Into<Vec<u8>>) {
        self.state.lock().inbound.push_back(chunk.into());
    }

    /// 当前尚未被读取的入站字节总数。
    pub fn pending_inbound(&self) -> usize {
        self.state.lock().inbound.iter().map(Vec::len).sum()
    }

    /// 客户端迄今写出的全部字节。
    pub fn outbound(&self) -> Vec<u8> {
        self.state.lock().outbound.clone()
    }

    /// 取走并清空已写出的字节。
    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().outbound)
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.state.lock().refuse_connect = refuse;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// 成功服务的 `read` 调用次数（含返回 0 的调用）。
    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    pub fn endpoint(&self) -> Option<(String, u16)> {
        self.state.lock().endpoint.clone()
    }
}

impl Connection for MemoryConnection {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.connect_calls += 1;
        state.endpoint = Some((host.to_owned(), port));
        if state.refuse_connect {
            return Err(
                TransportError::new(REFUSED_CODE, format!("memory connect to {host}:{port} refused"))
                    .with_kind(ErrorKind::TransportFailure),
            );
        }
        state.connected = true;
        state.closed = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            state.reads += 1;
            return Ok(0);
        }
        if !state.connected {
            return Err(not_connected("read"));
        }
        state.reads += 1;
        let Some(front) = state.inbound.front_mut() else {
            return Ok(0);
        };
        let count = buf.len().min(front.len());
        buf[..count].copy_from_slice(&front[..count]);
        front.drain(..count);
        if front.is_empty() {
            state.inbound.pop_front();
        }
        Ok(count)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed || !state.connected {
            return Err(not_connected("write"));
        }
        state.outbound.extend_from_slice(buf);
        if let Some(peer) = state.peer.as_mut() {
            let replies = peer.on_client_bytes(buf);
            state
                .inbound
                .extend(replies.into_iter().filter(|chunk| !chunk.is_empty()));
        }
        Ok(buf.len())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.close_calls += 1;
        state.connected = false;
        state.closed = true;
    }
}

fn not_connected(op: &str) -> TransportError {
    TransportError::new(NOT_CONNECTED_CODE, format!("memory {op} on unconnected channel"))
        .with_kind(ErrorKind::Unsupported)
}
