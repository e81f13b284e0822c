//! 响应解析属性测试：任意分块编码、任意到达分片下，响应体必须完整还原。

use parking_lot::Mutex;
use proptest::prelude::*;
use spark_https::{ClientConfig, ConnectionClient, ConnectionFactory, HttpsClient, Request, TcpFactory};
use spark_transport::Connection;
use spark_transport::memory::MemoryConnection;

/// 每次 `create` 交出同一份预置入站分片的内存连接。
struct Replay {
    chunks: Mutex<Option<Vec<Vec<u8>>>>,
}

impl ConnectionFactory for Replay {
    fn valid(&self) -> bool {
        true
    }

    fn create(&self, _config: &ClientConfig) -> Box<dyn Connection> {
        let chunks = self.chunks.lock().take().unwrap_or_default();
        Box::new(MemoryConnection::with_inbound(chunks))
    }
}

fn encode_chunked(body: &[u8], sizes: &[usize]) -> Vec<u8> {
    let mut out = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    let mut rest = body;
    let mut sizes = sizes.iter().cycle();
    while !rest.is_empty() {
        let size = sizes.next().copied().unwrap_or(rest.len()).clamp(1, rest.len());
        out.extend_from_slice(format!("{size:x}\r\n").as_bytes());
        out.extend_from_slice(&rest[..size]);
        out.extend_from_slice(b"\r\n");
        rest = &rest[size..];
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

fn segment(wire: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts.iter().map(|cut| cut % (wire.len() + 1)).collect();
    points.push(0);
    points.push(wire.len());
    points.sort_unstable();
    points.dedup();
    points.windows(2).map(|w| wire[w[0]..w[1]].to_vec()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn chunked_body_survives_arbitrary_segmentation(
        body in prop::collection::vec(any::<u8>(), 0..3000),
        sizes in prop::collection::vec(1usize..700, 1..6),
        cuts in prop::collection::vec(any::<usize>(), 0..16),
        read_chunk in 1usize..64,
    ) {
        let wire = encode_chunked(&body, &sizes);
        let client = ConnectionClient::with_factories(
            "replay",
            TcpFactory,
            Replay { chunks: Mutex::new(Some(segment(&wire, &cuts))) },
            ClientConfig { read_chunk, ..ClientConfig::default() },
        );
        let reply = client.request(&Request::new("https://replay.test/")).expect("reply");
        prop_assert_eq!(reply.response_code, 200);
        prop_assert_eq!(reply.body, body);
    }

    #[test]
    fn content_length_body_survives_arbitrary_segmentation(
        body in prop::collection::vec(any::<u8>(), 1..3000),
        cuts in prop::collection::vec(any::<usize>(), 0..16),
    ) {
        let mut wire = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        wire.extend_from_slice(&body);
        let client = ConnectionClient::with_factories(
            "replay",
            TcpFactory,
            Replay { chunks: Mutex::new(Some(segment(&wire, &cuts))) },
            ClientConfig::default(),
        );
        let reply = client.request(&Request::new("https://replay.test/")).expect("reply");
        prop_assert_eq!(reply.body, body);
    }
}
