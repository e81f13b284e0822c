use crate::error::{ErrorKind, TransportError};

const WRITE_ZERO_CODE: &str = "spark.transport.write_zero";

/// 统一的阻塞式字节流连接接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 明文 TCP、基于系统安全上下文的 TLS 以及测试用内存通道都以同一组
///   `connect/read/write/close` 暴露给 HTTPS 门面，门面不感知具体实现；
/// - 方法签名全部为同步阻塞调用：调用线程会一直阻塞到底层套接字完成或报错，
///   超时由具体实现（套接字配置）负责。
///
/// ## 架构定位（Architecture）
/// - 该 trait 位于 `spark-transport` 契约层，由 `spark-transport-tcp`、
///   `spark-transport-sspi` 与 [`MemoryConnection`](crate::memory::MemoryConnection) 实现；
/// - 门面通过 `Box<dyn Connection>` 统一调度，故接口保持对象安全。
///
/// ## 契约说明（What）
/// - `connect`：建立到 `host:port` 的连接；失败时实现必须释放已获取的全部资源；
/// - `read`：读取至多 `buf.len()` 字节；`Ok(0)` 表示对端关闭或当前无可交付数据；
/// - `write`：写出至多 `buf.len()` 字节，返回实际写出数；`Ok(0)` 表示写入失败但连接未报错；
/// - `close`：释放连接持有的资源，必须幂等；
/// - `write_all`：循环调用 `write` 直至全部写出，遇到 `Ok(0)` 视为错误；
/// - `max_write_len`：单次 `write` 可接受的最大字节数，`None` 表示无上限，调用方据此分片。
///
/// ## 风险提示（Trade-offs）
/// - 单个连接实例不支持并发访问，`&mut self` 由借用检查器保证串行；
/// - `read` 的 `Ok(0)` 语义同时涵盖 EOF 与“记录层降级”，调用方应把连续的零长度读视为流结束。
pub trait Connection: Send {
    /// 建立到 `host:port` 的连接。
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    /// 读取数据到 `buf`，返回实际读取字节数。
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// 写出 `buf` 中的数据，返回实际写出字节数。
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// 关闭连接并释放资源。
    fn close(&mut self);

    /// 单次 `write` 可接受的最大字节数。
    fn max_write_len(&self) -> Option<usize> {
        None
    }

    /// 循环写出全部字节。
    fn write_all(&mut self, mut buf: &[u8]) -> Result<(), TransportError> {
        while !buf.is_empty() {
            let written = self.write(buf)?;
            if written == 0 {
                return Err(TransportError::new(
                    WRITE_ZERO_CODE,
                    format!("write returned zero with {} bytes pending", buf.len()),
                )
                .with_kind(ErrorKind::TransportFailure));
            }
            buf = &buf[written..];
        }
        Ok(())
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        (**self).connect(host, port)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        (**self).write(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn max_write_len(&self) -> Option<usize> {
        (**self).max_write_len()
    }
}
