//! `spark-buffer` 提供传输层复用的字节缓冲实现。
//!
//! # 模块定位（Why）
//! - TLS 记录层需要跨调用保存“尚未解密的密文尾巴”与“尚未交付的明文”，
//!   两者都是严格先进先出的字节序列；HTTP 响应读取同样需要“补读后按边界取出”；
//! - 以独立 crate 提供单一的 [`ByteQueue`]，避免各传输实现手写 `Vec` 搬移逻辑。
//!
//! # 设计概要（How）
//! - `byte_queue` 模块基于 `bytes::BytesMut` 实现队尾追加、队首出队与队首放回。

mod byte_queue;

pub use byte_queue::ByteQueue;
