use bytes::{Buf, BytesMut};

/// 先进先出的字节队列，供 TLS 记录层缓存“未消费的密文”与“未交付的明文”。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 记录层在一次 `read` 中可能读到超过一条记录的密文（尾随的下一条记录片段），
///   也可能解出比调用方缓冲更多的明文；两类剩余字节都需要跨调用保留且严格保序；
/// - 两种场景的操作集合完全一致，因此以同一类型承载，避免两套手写缓冲逻辑。
///
/// ## 逻辑（How）
/// - 底层使用 [`BytesMut`]：`push_back` 直接追加；`pop_front_into`/`take_front` 通过
///   `advance`/`split_to` 从头部消费，不搬移剩余数据；
/// - `push_front` 用于“放回队首”：新建缓冲并依次拷贝新片段与原有内容，保证放回的字节
///   先于已驻留字节被读出。
///
/// ## 契约（What）
/// - 队列只提供尾部追加、头部出队与头部放回三类操作；
/// - 所有出队方法返回实际出队的字节数（或片段），永不超过请求值；
/// - **后置条件**：任何操作都不会丢失或重复字节，字节顺序与入队语义一致。
///
/// ## 风险与权衡（Trade-offs）
/// - `push_front` 需要一次额外拷贝；记录层仅在“解密剩余明文/尾随密文”时调用，频率低，可接受；
/// - 队列本身不设容量上限，上限策略由调用方（记录层的积压限制）负责。
#[derive(Debug, Default, Clone)]
pub struct ByteQueue {
    inner: BytesMut,
}

impl ByteQueue {
    /// 创建空队列。
    pub fn new() -> Self {
        Self {
            inner: BytesMut::new(),
        }
    }

    /// 以预留容量创建空队列。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// 只读查看当前全部字节。
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// 在队尾追加字节。
    pub fn push_back(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// 将 `data` 放回队首，使其先于已驻留字节被读出。
    pub fn push_front(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if self.inner.is_empty() {
            self.inner.extend_from_slice(data);
            return;
        }
        let mut merged = BytesMut::with_capacity(data.len() + self.inner.len());
        merged.extend_from_slice(data);
        merged.extend_from_slice(&self.inner);
        self.inner = merged;
    }

    /// 从队首拷贝至多 `out.len()` 字节到 `out`，返回实际拷贝数。
    pub fn pop_front_into(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.inner.len());
        out[..count].copy_from_slice(&self.inner[..count]);
        self.inner.advance(count);
        count
    }

    /// 从队首取出至多 `max` 字节作为独立缓冲。
    pub fn take_front(&mut self, max: usize) -> BytesMut {
        let count = max.min(self.inner.len());
        self.inner.split_to(count)
    }

    /// 取出全部字节并清空队列。
    pub fn take_all(&mut self) -> BytesMut {
        self.inner.split()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
