use spark_transport::{ErrorKind, TransportError};
use std::io;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: "spark.transport.tcp.resolve_failed",
    message: "tcp resolve",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.transport.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.transport.tcp.configure_failed",
    message: "tcp configure",
};

const NOT_CONNECTED_CODE: &str = "spark.transport.tcp.not_connected";
const NO_ADDRESS_CODE: &str = "spark.transport.tcp.no_address";

/// 将 IO 错误映射为传输层错误，并附带错误分类。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> TransportError {
    let category = categorize_io_error(&error);
    TransportError::new(kind.code, format!("{}: {}", kind.message, error))
        .with_kind(category)
        .with_source(error)
}

/// 未建立连接即读写。
pub(crate) fn not_connected(kind: OperationKind) -> TransportError {
    TransportError::new(
        NOT_CONNECTED_CODE,
        format!("{} on a connection that was never opened", kind.message),
    )
    .with_kind(ErrorKind::Unsupported)
}

/// 域名解析成功但未得到任何地址。
pub(crate) fn no_address(host: &str, port: u16) -> TransportError {
    TransportError::new(
        NO_ADDRESS_CODE,
        format!("{}: {host}:{port} resolved to no address", RESOLVE.message),
    )
    .with_kind(ErrorKind::TransportFailure)
}

fn categorize_io_error(error: &io::Error) -> ErrorKind {
    use io::ErrorKind as Io;
    match error.kind() {
        Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
        Io::Unsupported => ErrorKind::Unsupported,
        _ => ErrorKind::TransportFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::{READ, map_io_error};
    use spark_transport::ErrorKind;
    use std::io;

    #[test]
    fn timeouts_are_classified_separately() {
        let err = map_io_error(READ, io::Error::from(io::ErrorKind::WouldBlock));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.code(), "spark.transport.tcp.read_failed");

        let err = map_io_error(READ, io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }
}
