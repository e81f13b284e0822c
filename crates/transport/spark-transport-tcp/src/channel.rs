use crate::{
    error::{self, CONFIGURE, map_io_error},
    util::{connect_first, duration_ms, resolve},
};
use serde::{Deserialize, Serialize};
use socket2::SockRef;
use spark_transport::{Connection, TransportError};
use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

/// TCP 套接字级配置项，实现对内核行为的显式控制。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 阻塞式连接没有取消原语，唯一能防止“对端沉默导致线程永久阻塞”的手段是套接字超时；
///   因此建连、读、写三类超时都在此显式配置；
/// - `SO_LINGER` 决定 `close` 之后未发送完的数据如何处理，沿用框架一贯的显式配置方式，
///   避免调用方直接操作 `socket2`。
///
/// ## 核心逻辑（How）
/// - `apply` 在建连成功后立即执行：读/写超时与 `TCP_NODELAY` 通过标准库设置，
///   `linger` 通过 `socket2::SockRef::set_linger` 落地；
/// - 字段以毫秒整数参与序列化，可直接嵌入 TOML 配置。
///
/// ## 契约说明（What）
/// - 所有超时为 `None` 时沿用内核默认（即无限阻塞）；
/// - **前置条件**：调用 `apply` 前，`TcpStream` 必须已成功创建；
/// - **后置条件**：若 `apply` 返回 `Ok(())`，则套接字选项已落地，失败时连接被丢弃。
///
/// ## 设计取舍与注意事项（Trade-offs）
/// - `SO_LINGER` 在不同平台的精度不同（Linux 取整到秒）；
/// - 默认读超时为 30 秒：握手阶段的“协商轮次”没有计数上限，只能依赖该超时兜底。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSocketConfig {
    #[serde(with = "duration_ms")]
    connect_timeout: Option<Duration>,
    #[serde(with = "duration_ms")]
    read_timeout: Option<Duration>,
    #[serde(with = "duration_ms")]
    write_timeout: Option<Duration>,
    #[serde(with = "duration_ms")]
    linger: Option<Duration>,
    nodelay: bool,
}

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_IO_TIMEOUT),
            read_timeout: Some(DEFAULT_IO_TIMEOUT),
            write_timeout: Some(DEFAULT_IO_TIMEOUT),
            linger: None,
            nodelay: true,
        }
    }
}

impl TcpSocketConfig {
    /// 创建默认配置。
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_write_timeout(self.write_timeout)?;
        stream.set_nodelay(self.nodelay)?;
        SockRef::from(stream).set_linger(self.linger)
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Open(TcpStream),
    Closed,
}

/// 阻塞式 TCP 连接，HTTPS 门面与安全连接共用的原始字节流。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 为安全上下文握手与记录层提供“裸”字节通道：握手令牌与加密记录都经由它收发；
/// - 同时作为 `http://` 请求的明文传输，与安全连接满足同一 [`Connection`] 契约。
///
/// ## 逻辑 (How)
/// - `connect`：解析域名后按系统返回顺序逐个尝试，首个成功的地址胜出，随后应用
///   [`TcpSocketConfig`]；
/// - `read`/`write`：单次系统调用，`Interrupted` 自动重试，其余错误映射为
///   [`TransportError`]；
/// - `close`：尽力双向半关闭后释放句柄，可重复调用。
///
/// ## 契约 (What)
/// - 未连接时读写返回 `Unsupported`；关闭后 `read` 恒为 `Ok(0)`；
/// - 再次 `connect` 会先关闭旧连接；
/// - `peer_addr`/`local_addr` 仅在连接打开期间返回 `Some`。
///
/// ## 注意事项 (Trade-offs)
/// - 读超时表现为 `Timeout` 类错误而非 `Ok(0)`，调用方可据此区分“对端关闭”与“对端沉默”。
#[derive(Debug)]
pub struct TcpConnection {
    state: State,
    config: TcpSocketConfig,
}

impl TcpConnection {
    /// 使用默认配置创建未连接的实例。
    pub fn new() -> Self {
        Self::with_config(TcpSocketConfig::default())
    }

    pub fn with_config(config: TcpSocketConfig) -> Self {
        Self {
            state: State::Idle,
            config,
        }
    }

    /// 返回构造时使用的套接字配置。
    pub fn config(&self) -> &TcpSocketConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            State::Open(stream) => stream.peer_addr().ok(),
            _ => None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            State::Open(stream) => stream.local_addr().ok(),
            _ => None,
        }
    }

    /// 查询底层套接字当前的 `SO_LINGER` 设置。
    ///
    /// - 未连接时返回 `Ok(None)`；
    /// - Linux 会将 `Duration` 向下取整到秒，断言需据此选择阈值。
    pub fn linger(&self) -> Result<Option<Duration>, TransportError> {
        match &self.state {
            State::Open(stream) => SockRef::from(stream)
                .linger()
                .map_err(|err| map_io_error(CONFIGURE, err)),
            _ => Ok(None),
        }
    }
}

impl Default for TcpConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for TcpConnection {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        if self.is_open() {
            self.close();
        }
        let addrs = resolve(host, port)?;
        let stream = connect_first(&addrs, self.config.connect_timeout)?;
        self.config
            .apply(&stream)
            .map_err(|err| map_io_error(CONFIGURE, err))?;
        tracing::debug!(
            host,
            port,
            peer = ?stream.peer_addr().ok(),
            "tcp connection established"
        );
        self.state = State::Open(stream);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = match &mut self.state {
            State::Open(stream) => stream,
            State::Closed => return Ok(0),
            State::Idle => return Err(error::not_connected(error::READ)),
        };
        loop {
            match stream.read(buf) {
                Ok(count) => return Ok(count),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(map_io_error(error::READ, err)),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let stream = match &mut self.state {
            State::Open(stream) => stream,
            State::Closed | State::Idle => return Err(error::not_connected(error::WRITE)),
        };
        loop {
            match stream.write(buf) {
                Ok(count) => return Ok(count),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(map_io_error(error::WRITE, err)),
            }
        }
    }

    fn close(&mut self) {
        if let State::Open(stream) = std::mem::replace(&mut self.state, State::Closed) {
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                tracing::trace!(error = %err, "tcp shutdown on close failed");
            }
            tracing::debug!("tcp connection closed");
        }
    }
}
