use spark_buffer::ByteQueue;
use spark_transport::Connection;

use crate::error::HttpsError;
use crate::message::{Method, Reply};
use crate::wire::{self, BodyFraming, ResponseHead};

/// 读取响应时的尺寸约束。
#[derive(Clone, Copy, Debug)]
pub(crate) struct ResponseLimits {
    pub read_chunk: usize,
    pub max_header_bytes: usize,
    pub max_response_bytes: usize,
}

/// 在一条已发送请求的连接上读取完整响应。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接层只承诺“单次读取返回若干字节”，响应边界必须由 HTTP 定界规则决定；
/// - 未解析的字节保存在 [`ByteQueue`] 中，按需补读，避免任何位置出现整段搬移。
///
/// ## 核心逻辑（How）
/// - 先读到 `\r\n\r\n` 为止解析头部，跳过 `100 Continue` 等临时响应；
/// - 再按 [`BodyFraming`] 读取响应体：定长、`chunked` 或读到 EOF。
///
/// ## 契约（What）
/// - 连接读到 0 即视为 EOF；定长或分块响应在完成前遇到 EOF 报 [`HttpsError::Truncated`]；
/// - 累计读取超过 `max_response_bytes`、头部超过 `max_header_bytes` 时报
///   [`HttpsError::ResponseTooLarge`]。
pub(crate) struct ResponseReader<'a, C: Connection + ?Sized> {
    conn: &'a mut C,
    pending: ByteQueue,
    chunk: Vec<u8>,
    limits: ResponseLimits,
    received: usize,
}

impl<'a, C: Connection + ?Sized> ResponseReader<'a, C> {
    pub fn new(conn: &'a mut C, limits: ResponseLimits) -> Self {
        Self {
            conn,
            pending: ByteQueue::new(),
            chunk: vec![0u8; limits.read_chunk.max(1)],
            limits,
            received: 0,
        }
    }

    pub fn read_reply(mut self, method: Method) -> Result<Reply, HttpsError> {
        let head = loop {
            let head = self.read_head()?;
            if (100..200).contains(&head.status) && head.status != 101 {
                tracing::trace!(status = head.status, "skipping interim response");
                continue;
            }
            break head;
        };
        let framing = BodyFraming::of(method, &head)?;
        let body = match framing {
            BodyFraming::Empty => Vec::new(),
            BodyFraming::Length(length) => self.read_exact_body(length)?,
            BodyFraming::Chunked => self.read_chunked_body()?,
            BodyFraming::UntilEof => self.read_to_eof()?,
        };
        tracing::debug!(
            status = head.status,
            framing = ?framing,
            body_len = body.len(),
            received = self.received,
            "http response read"
        );
        Ok(Reply {
            response_code: head.status,
            headers: head.headers,
            body,
        })
    }

    /// 补读一次；返回 `false` 表示 EOF。
    fn fill(&mut self) -> Result<bool, HttpsError> {
        let n = self.conn.read(&mut self.chunk)?;
        if n == 0 {
            return Ok(false);
        }
        self.received += n;
        if self.received > self.limits.max_response_bytes {
            return Err(HttpsError::ResponseTooLarge {
                limit: self.limits.max_response_bytes,
            });
        }
        self.pending.push_back(&self.chunk[..n]);
        Ok(true)
    }

    fn read_head(&mut self) -> Result<ResponseHead, HttpsError> {
        loop {
            if let Some(end) = wire::find_end_of_headers(self.pending.as_slice()) {
                if end > self.limits.max_header_bytes {
                    break;
                }
                let raw = self.pending.take_front(end);
                return wire::parse_head(&raw);
            }
            if self.pending.len() > self.limits.max_header_bytes {
                break;
            }
            if !self.fill()? {
                return Err(HttpsError::Truncated(if self.pending.is_empty() {
                    "status line"
                } else {
                    "headers"
                }));
            }
        }
        Err(HttpsError::ResponseTooLarge {
            limit: self.limits.max_header_bytes,
        })
    }

    fn read_exact_body(&mut self, length: usize) -> Result<Vec<u8>, HttpsError> {
        if length > self.limits.max_response_bytes {
            return Err(HttpsError::ResponseTooLarge {
                limit: self.limits.max_response_bytes,
            });
        }
        while self.pending.len() < length {
            if !self.fill()? {
                return Err(HttpsError::Truncated("body"));
            }
        }
        Ok(self.pending.take_front(length).to_vec())
    }

    fn read_to_eof(&mut self) -> Result<Vec<u8>, HttpsError> {
        while self.fill()? {}
        Ok(self.pending.take_all().to_vec())
    }

    fn read_chunked_body(&mut self) -> Result<Vec<u8>, HttpsError> {
        let mut body = Vec::new();
        loop {
            let line = self.next_line("chunk size")?;
            let size = wire::parse_chunk_size(&line)?;
            if size == 0 {
                break;
            }
            let framed = size
                .checked_add(2)
                .ok_or(HttpsError::Protocol("invalid chunk size"))?;
            if body.len().saturating_add(size) > self.limits.max_response_bytes {
                return Err(HttpsError::ResponseTooLarge {
                    limit: self.limits.max_response_bytes,
                });
            }
            while self.pending.len() < framed {
                if !self.fill()? {
                    return Err(HttpsError::Truncated("chunk data"));
                }
            }
            let data = self.pending.take_front(framed);
            if &data[size..] != b"\r\n" {
                return Err(HttpsError::Protocol("missing chunk terminator"));
            }
            body.extend_from_slice(&data[..size]);
        }
        // 尾部字段被丢弃；最后一个块之后直接断开也可接受。
        loop {
            match self.next_line("chunk trailer") {
                Ok(line) if line.is_empty() => break,
                Ok(_) => continue,
                Err(HttpsError::Truncated(_)) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(body)
    }

    /// 取出下一行，不含 CRLF。
    fn next_line(&mut self, what: &'static str) -> Result<Vec<u8>, HttpsError> {
        loop {
            if let Some(end) = wire::find_crlf(self.pending.as_slice()) {
                let mut line = self.pending.take_front(end + 2);
                line.truncate(end);
                return Ok(line.to_vec());
            }
            if self.pending.len() > self.limits.max_header_bytes {
                return Err(HttpsError::Protocol("chunk line too long"));
            }
            if !self.fill()? {
                return Err(HttpsError::Truncated(what));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use spark_transport::Connection;
    use spark_transport::memory::MemoryConnection;

    use super::{ResponseLimits, ResponseReader};
    use crate::error::HttpsError;
    use crate::message::Method;

    const LIMITS: ResponseLimits = ResponseLimits {
        read_chunk: 7,
        max_header_bytes: 256,
        max_response_bytes: 1024,
    };

    fn read(chunks: &[&[u8]], method: Method, limits: ResponseLimits) -> Result<crate::Reply, HttpsError> {
        let mut conn = MemoryConnection::with_inbound(chunks.iter().map(|chunk| chunk.to_vec()));
        conn.connect("reply.test", 80).expect("connect");
        ResponseReader::new(&mut conn, limits).read_reply(method)
    }

    #[test]
    fn content_length_body_ignores_trailing_bytes() {
        let reply = read(
            &[b"HTTP/1.1 200 OK\r\nContent-Le", b"ngth: 5\r\n\r\nhel", b"lo-extra"],
            Method::Get,
            LIMITS,
        )
        .expect("reply");
        assert_eq!(reply.response_code, 200);
        assert_eq!(reply.body, b"hello");
    }

    #[test]
    fn chunked_body_with_extensions_and_trailers() {
        let reply = read(
            &[
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
                b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n",
                b"0\r\nExpires: never\r\n\r\n",
            ],
            Method::Get,
            LIMITS,
        )
        .expect("reply");
        assert_eq!(reply.text(), "Wikipedia");
    }

    #[test]
    fn interim_responses_are_skipped() {
        let reply = read(
            &[b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok"],
            Method::Post,
            LIMITS,
        )
        .expect("reply");
        assert_eq!(reply.response_code, 201);
        assert_eq!(reply.body, b"ok");
    }

    #[test]
    fn head_reply_has_no_body_and_eof_body_reads_to_close() {
        let head = read(&[b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n"], Method::Head, LIMITS).expect("head");
        assert!(head.body.is_empty());
        assert_eq!(head.headers.get("content-length"), Some("10"));

        let eof = read(&[b"HTTP/1.0 200 OK\r\n\r\nstream", b"ed"], Method::Get, LIMITS).expect("eof");
        assert_eq!(eof.body, b"streamed");
    }

    #[test]
    fn truncation_is_reported_per_phase() {
        assert!(matches!(read(&[], Method::Get, LIMITS), Err(HttpsError::Truncated("status line"))));
        assert!(matches!(
            read(&[b"HTTP/1.1 200 OK\r\nA: b"], Method::Get, LIMITS),
            Err(HttpsError::Truncated("headers"))
        ));
        assert!(matches!(
            read(&[b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\nshort"], Method::Get, LIMITS),
            Err(HttpsError::Truncated("body"))
        ));
        assert!(matches!(
            read(&[b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nab"], Method::Get, LIMITS),
            Err(HttpsError::Truncated("chunk data"))
        ));
    }

    #[test]
    fn limits_are_enforced() {
        let oversized_head = [b"HTTP/1.1 200 OK\r\nX-Pad: ".as_slice(), &[b'a'; 300]];
        assert!(matches!(
            read(&oversized_head, Method::Get, LIMITS),
            Err(HttpsError::ResponseTooLarge { limit: 256 })
        ));
        assert!(matches!(
            read(&[b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n"], Method::Get, LIMITS),
            Err(HttpsError::ResponseTooLarge { limit: 1024 })
        ));
        let eof_body = [b"HTTP/1.1 200 OK\r\n\r\n".as_slice(), &[b'z'; 1100]];
        assert!(matches!(
            read(&eof_body, Method::Get, LIMITS),
            Err(HttpsError::ResponseTooLarge { limit: 1024 })
        ));
    }

    #[test]
    fn bad_chunk_terminator_is_a_protocol_error() {
        assert!(matches!(
            read(&[b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nabXY0\r\n\r\n"], Method::Get, LIMITS),
            Err(HttpsError::Protocol("missing chunk terminator"))
        ));
    }
}
