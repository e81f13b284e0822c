use crate::error::{self, map_io_error};
use spark_transport::TransportError;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// 解析 `host:port`，保留系统解析器返回的顺序。
pub(crate) fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|err| map_io_error(error::RESOLVE, err))?
        .collect();
    if addrs.is_empty() {
        return Err(error::no_address(host, port));
    }
    Ok(addrs)
}

/// 依次尝试每个地址，返回第一个建连成功的流；全部失败时返回最后一个错误。
pub(crate) fn connect_first(
    addrs: &[SocketAddr],
    timeout: Option<Duration>,
) -> Result<TcpStream, TransportError> {
    let mut last_error = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                tracing::debug!(%addr, error = %err, "tcp connect attempt failed");
                last_error = Some(err);
            }
        }
    }
    Err(match last_error {
        Some(err) => map_io_error(error::CONNECT, err),
        None => error::no_address("<empty>", 0),
    })
}

/// `Option<Duration>` 以毫秒整数序列化，便于在 TOML 中书写。
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => {
                serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
