//! 记录层集成测试：以内存连接精确控制分片，验证缓冲、尾随记录与 EOF 语义。
//!
//! - **Why**：记录层正确性取决于“字节以何种边界到达”，只有脚本化的分片才能稳定复现；
//! - **How**：`MemoryConnection` 挂载 `SharedLoopbackPeer` 完成真实的两轮握手，之后由测试
//!   手工封装记录并按需切分后推入入站队列；
//! - **What**：覆盖小缓冲分段读取、跨分片拼接、多记录同包、关闭通知、握手失败清理等场景。

use spark_transport::memory::{MemoryConnection, MemoryHandle};
use spark_transport::{Connection, ErrorKind};
use spark_transport_sspi::loopback::{
    DEFAULT_MAX_MESSAGE, HEADER_LEN, LoopbackPeer, LoopbackProvider, SharedLoopbackPeer, TRAILER_LEN,
};
use spark_transport_sspi::{SecureConnection, SecureTransportConfig};

const SECRET: &str = "record-layer-secret";

type Client = SecureConnection<LoopbackProvider, MemoryConnection>;

struct Harness {
    client: Client,
    handle: MemoryHandle,
    peer: SharedLoopbackPeer,
    provider: LoopbackProvider,
}

fn harness_with(peer: LoopbackPeer, config: SecureTransportConfig) -> Harness {
    let peer = SharedLoopbackPeer::new(peer);
    let socket = MemoryConnection::new().with_peer(peer.clone());
    let handle = socket.handle();
    let provider = LoopbackProvider::new(SECRET);
    let client = SecureConnection::with_socket(provider.clone(), socket, config);
    Harness {
        client,
        handle,
        peer,
        provider,
    }
}

fn connected(peer: LoopbackPeer) -> Harness {
    let mut harness = harness_with(peer, SecureTransportConfig::default());
    harness
        .client
        .connect("example.test", 443)
        .expect("loopback handshake");
    harness
}

impl Harness {
    fn seal(&self, payload: &[u8]) -> Vec<u8> {
        self.peer.lock().seal(payload).expect("peer established")
    }
}

#[test]
fn handshake_runs_two_rounds_and_reports_target_host() {
    let harness = connected(LoopbackPeer::new(SECRET).with_identity("example.test"));
    assert!(harness.client.is_established());
    assert!(harness.peer.lock().is_established());
    assert_eq!(harness.peer.lock().hostname(), Some("example.test"));
    assert_eq!(harness.handle.endpoint(), Some(("example.test".to_owned(), 443)));
    assert_eq!(harness.client.max_write_len(), Some(16 * 1024));
    assert_eq!(harness.provider.live_contexts(), 1);
    assert_eq!(harness.provider.live_credentials(), 1);
}

#[test]
fn small_buffers_drain_one_record_in_order() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let payload: Vec<u8> = (0..100u8).collect();
    harness.handle.push_inbound(harness.seal(&payload));

    let mut buf = [0u8; 10];
    assert_eq!(harness.client.read(&mut buf).expect("first read"), 10);
    assert_eq!(&buf[..], &payload[..10]);
    assert_eq!(harness.client.pending_plaintext(), 90);

    let reads_before = harness.handle.reads();
    let mut buf = [0u8; 50];
    assert_eq!(harness.client.read(&mut buf).expect("second read"), 50);
    assert_eq!(&buf[..], &payload[10..60]);

    let mut buf = [0u8; 64];
    assert_eq!(harness.client.read(&mut buf).expect("third read"), 40);
    assert_eq!(&buf[..40], &payload[60..]);
    assert_eq!(harness.handle.reads(), reads_before, "buffered plaintext must not touch the socket");
}

#[test]
fn record_split_across_segments_is_reassembled() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let wire = harness.seal(b"split record payload");
    harness.handle.push_inbound(wire[..3].to_vec());
    harness.handle.push_inbound(wire[3..HEADER_LEN + 4].to_vec());
    harness.handle.push_inbound(wire[HEADER_LEN + 4..].to_vec());

    let mut buf = [0u8; 64];
    let n = harness.client.read(&mut buf).expect("reassembled read");
    assert_eq!(&buf[..n], b"split record payload");
    assert_eq!(harness.client.pending_ciphertext(), 0);
}

#[test]
fn trailing_record_is_served_without_another_socket_read() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let mut batch = harness.seal(b"first");
    batch.extend_from_slice(&harness.seal(b"second"));
    harness.handle.push_inbound(batch);

    let mut buf = [0u8; 64];
    let n = harness.client.read(&mut buf).expect("first record");
    assert_eq!(&buf[..n], b"first");
    assert!(harness.client.pending_ciphertext() > 0);

    let reads_before = harness.handle.reads();
    let n = harness.client.read(&mut buf).expect("second record");
    assert_eq!(&buf[..n], b"second");
    assert_eq!(harness.handle.reads(), reads_before);
}

#[test]
fn partial_trailing_record_is_completed_by_the_next_segment() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let first = harness.seal(b"complete");
    let second = harness.seal(b"carried over");
    let mut batch = first.clone();
    batch.extend_from_slice(&second[..4]);
    harness.handle.push_inbound(batch);
    harness.handle.push_inbound(second[4..].to_vec());

    let mut buf = [0u8; 64];
    let n = harness.client.read(&mut buf).expect("first record");
    assert_eq!(&buf[..n], b"complete");
    assert_eq!(harness.client.pending_ciphertext(), 4);

    let n = harness.client.read(&mut buf).expect("carried record");
    assert_eq!(&buf[..n], b"carried over");
    assert_eq!(harness.client.pending_ciphertext(), 0);
}

#[test]
fn empty_record_does_not_look_like_end_of_stream() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let mut batch = harness.seal(b"");
    batch.extend_from_slice(&harness.seal(b"x"));
    harness.handle.push_inbound(batch);

    let mut buf = [0u8; 8];
    assert_eq!(harness.client.read(&mut buf).expect("read past empty record"), 1);
    assert_eq!(buf[0], b'x');
}

#[test]
fn close_notify_yields_repeatable_end_of_stream() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let mut batch = harness.seal(b"last words");
    batch.extend_from_slice(&harness.peer.lock().seal_close_notify().expect("close notify"));
    harness.handle.push_inbound(batch);

    let mut buf = [0u8; 64];
    let n = harness.client.read(&mut buf).expect("data before close");
    assert_eq!(&buf[..n], b"last words");
    assert_eq!(harness.client.read(&mut buf).expect("close notify"), 0);

    let reads_before = harness.handle.reads();
    assert_eq!(harness.client.read(&mut buf).expect("repeat"), 0);
    assert_eq!(harness.client.read(&mut buf).expect("repeat"), 0);
    assert_eq!(harness.handle.reads(), reads_before);
}

#[test]
fn stream_ending_inside_a_record_keeps_the_fragment() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let wire = harness.seal(b"never finished");
    harness.handle.push_inbound(wire[..9].to_vec());

    let mut buf = [0u8; 64];
    assert_eq!(harness.client.read(&mut buf).expect("eof inside record"), 0);
    assert_eq!(harness.client.pending_ciphertext(), 9);
    assert_eq!(harness.client.read(&mut buf).expect("repeat eof"), 0);
    assert_eq!(harness.client.pending_ciphertext(), 9);

    harness.handle.push_inbound(wire[9..].to_vec());
    let n = harness.client.read(&mut buf).expect("late completion");
    assert_eq!(&buf[..n], b"never finished");
}

#[test]
fn tampered_record_reads_as_zero_and_stays_failed() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let mut wire = harness.seal(b"tampered");
    wire[HEADER_LEN + 1] ^= 0x55;
    harness.handle.push_inbound(wire);
    harness.handle.push_inbound(harness.seal(b"after"));

    let mut buf = [0u8; 64];
    assert_eq!(harness.client.read(&mut buf).expect("failure maps to zero"), 0);
    assert_eq!(harness.client.read(&mut buf).expect("still failed"), 0);
}

#[test]
fn record_arriving_in_many_small_segments_is_reassembled() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let payload: Vec<u8> = (0..16 * 1024u32).map(|i| (i % 251) as u8).collect();
    let wire = harness.seal(&payload);
    let segments = wire.chunks(200).count();
    assert!(segments > 64);
    for segment in wire.chunks(200) {
        harness.handle.push_inbound(segment.to_vec());
    }

    let mut buf = vec![0u8; payload.len()];
    assert_eq!(harness.client.read(&mut buf).expect("whole record"), payload.len());
    assert_eq!(buf, payload);
    assert_eq!(harness.handle.pending_inbound(), 0);
    assert_eq!(harness.client.pending_ciphertext(), 0);
}

#[test]
fn large_caller_buffer_pulls_at_most_one_record_from_the_socket() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let first = harness.seal(&[1u8; DEFAULT_MAX_MESSAGE]);
    let second = harness.seal(&[2u8; DEFAULT_MAX_MESSAGE]);
    assert_eq!(first.len(), HEADER_LEN + DEFAULT_MAX_MESSAGE + TRAILER_LEN);
    let mut segment = first;
    segment.extend_from_slice(&second);
    harness.handle.push_inbound(segment);

    let mut buf = vec![0u8; 1 << 20];
    assert_eq!(harness.client.read(&mut buf).expect("first record"), DEFAULT_MAX_MESSAGE);
    assert!(buf[..DEFAULT_MAX_MESSAGE].iter().all(|b| *b == 1));
    assert_eq!(harness.handle.pending_inbound(), second.len());

    assert_eq!(harness.client.read(&mut buf).expect("second record"), DEFAULT_MAX_MESSAGE);
    assert!(buf[..DEFAULT_MAX_MESSAGE].iter().all(|b| *b == 2));
    assert_eq!(harness.handle.pending_inbound(), 0);
}

#[test]
fn ciphertext_cap_aborts_an_oversized_record() {
    let mut config = SecureTransportConfig::default();
    config.limits.max_pending_ciphertext = 64;
    let mut harness = harness_with(LoopbackPeer::new(SECRET), config);
    harness.client.connect("example.test", 443).expect("handshake");
    let wire = harness.seal(&[7u8; 200]);
    for byte in &wire {
        harness.handle.push_inbound(vec![*byte]);
    }

    let mut buf = [0u8; 256];
    assert_eq!(harness.client.read(&mut buf).expect("limit maps to zero"), 0);
    assert_eq!(harness.client.pending_ciphertext(), 0);
    assert_eq!(harness.client.read(&mut buf).expect("still failed"), 0);
    assert!(harness.handle.pending_inbound() > 0, "the rest of the record is never read");
}

#[test]
fn write_sends_one_record_and_rejects_oversized_payloads() {
    let mut harness = connected(LoopbackPeer::new(SECRET));
    let sent_before = harness.handle.outbound().len();
    assert_eq!(harness.client.write(b"hello server").expect("write"), 12);
    let sent = harness.handle.outbound().len() - sent_before;
    assert_eq!(sent, HEADER_LEN + 12 + 16);
    assert_eq!(harness.peer.lock().received(), b"hello server");

    let oversized = vec![0u8; 16 * 1024 + 1];
    assert_eq!(harness.client.write(&oversized).expect("oversized maps to zero"), 0);
    assert_eq!(harness.handle.outbound().len() - sent_before, sent);

    assert!(harness.client.write_all(&oversized).is_err());
}

#[test]
fn early_data_after_handshake_is_not_lost() {
    let mut harness = connected(LoopbackPeer::new(SECRET).with_early_data(b"early bird".to_vec()));
    assert!(harness.client.pending_ciphertext() > 0);
    let mut buf = [0u8; 64];
    let n = harness.client.read(&mut buf).expect("early data");
    assert_eq!(&buf[..n], b"early bird");
}

#[test]
fn echo_peer_round_trips_fragmented_replies() {
    let mut harness = connected(LoopbackPeer::new(SECRET).with_echo(7));
    harness.client.write_all(b"fragmented echo reply").expect("write");
    let mut received = Vec::new();
    let mut buf = [0u8; 5];
    while received.len() < 21 {
        let n = harness.client.read(&mut buf).expect("echo read");
        assert!(n > 0, "echo ended early");
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, b"fragmented echo reply");
}

#[test]
fn rejected_handshake_releases_everything_and_allows_retry() {
    let mut harness = harness_with(LoopbackPeer::new(SECRET).rejecting(), SecureTransportConfig::default());
    let err = harness
        .client
        .connect("example.test", 443)
        .expect_err("peer rejects");
    assert_eq!(err.kind(), ErrorKind::HandshakeFailure);
    assert_eq!(err.code(), "spark.transport.sspi.handshake_failed");
    assert!(!harness.client.is_established());
    assert_eq!(harness.provider.live_contexts(), 0);
    assert_eq!(harness.provider.live_credentials(), 0);
    assert!(!harness.handle.is_connected());
    assert_eq!(harness.handle.close_calls(), 1);

    *harness.peer.lock() = LoopbackPeer::new(SECRET);
    harness.client.connect("example.test", 443).expect("fresh handshake");
    assert!(harness.client.is_established());
    assert_eq!(harness.provider.live_contexts(), 1);
}

#[test]
fn peer_closing_during_handshake_is_a_handshake_failure() {
    let provider = LoopbackProvider::new(SECRET);
    let mut client = SecureConnection::with_socket(
        provider.clone(),
        MemoryConnection::new(),
        SecureTransportConfig::default(),
    );
    let err = client.connect("example.test", 443).expect_err("no server hello");
    assert_eq!(err.kind(), ErrorKind::HandshakeFailure);
    assert_eq!(err.code(), "spark.transport.sspi.handshake_eof");
    assert_eq!(provider.live_contexts(), 0);
}

#[test]
fn weak_context_is_rejected_after_negotiation() {
    let peer = SharedLoopbackPeer::new(LoopbackPeer::new(SECRET));
    let provider = LoopbackProvider::new(SECRET).with_weak_protection();
    let mut client = SecureConnection::with_socket(
        provider.clone(),
        MemoryConnection::new().with_peer(peer),
        SecureTransportConfig::default(),
    );
    let err = client.connect("example.test", 443).expect_err("weak context");
    assert_eq!(err.code(), "spark.transport.sspi.insufficient_protection");
    assert_eq!(provider.live_contexts(), 0);
}

#[test]
fn identity_mismatch_fails_validation() {
    let mut harness = harness_with(
        LoopbackPeer::new(SECRET).with_identity("someone-else.test"),
        SecureTransportConfig::default(),
    );
    let err = harness
        .client
        .connect("example.test", 443)
        .expect_err("identity mismatch");
    assert_eq!(err.kind(), ErrorKind::HandshakeFailure);
    assert_eq!(harness.provider.live_contexts(), 0);
}

#[test]
fn refused_socket_surfaces_transport_failure() {
    let socket = MemoryConnection::new();
    socket.handle().refuse_connect(true);
    let mut client = SecureConnection::with_socket(
        LoopbackProvider::new(SECRET),
        socket,
        SecureTransportConfig::default(),
    );
    let err = client.connect("example.test", 443).expect_err("refused");
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
}

#[test]
fn io_before_connect_and_after_close() {
    let mut harness = harness_with(LoopbackPeer::new(SECRET), SecureTransportConfig::default());
    assert!(harness.client.valid());
    let err = harness.client.read(&mut [0u8; 4]).expect_err("read before connect");
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert!(harness.client.write(b"x").is_err());

    harness.client.connect("example.test", 443).expect("handshake");
    harness.client.close();
    harness.client.close();
    assert_eq!(harness.provider.live_contexts(), 0);
    assert_eq!(harness.provider.live_credentials(), 0);
    assert_eq!(harness.client.read(&mut [0u8; 4]).expect("read after close"), 0);
    assert_eq!(harness.client.max_write_len(), None);
}

#[test]
fn unavailable_provider_is_reported_invalid() {
    let client = SecureConnection::with_socket(
        LoopbackProvider::new(SECRET).unavailable(),
        MemoryConnection::new(),
        SecureTransportConfig::default(),
    );
    assert!(!client.valid());
}
