use spark_buffer::ByteQueue;
use spark_transport::{Connection, TransportError};

use crate::{
    config::CodecLimits,
    error::{self, BACKLOG, DECRYPT, ENCRYPT, PAYLOAD_TOO_LARGE, POISONED, RENEGOTIATE, STREAM_SIZES},
    provider::{DecryptStatus, SealedLengths, SecurityContext, StreamSizes},
};

/// TLS 记录层：在已建立的安全上下文之上，把任意长度的明文读写映射为完整记录的收发。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 套接字按任意边界交付字节，而解密原语只接受“恰好从记录起点开始”的输入；
///   记录层负责拼出完整记录、保存多读到的下一条记录、保存调用方缓冲放不下的明文；
/// - 解密以显式循环实现，每轮补读都必须带来新字节，累积字节受 [`CodecLimits`] 约束。
///
/// ## 核心逻辑（How）
/// - `plaintext`：已解密未交付的明文，`read` 优先从这里取；
/// - `ciphertext`：已读入未解密的密文，每条记录的首段输入先取这里，为空时才访问套接字；
/// - 解密成功后，尾随密文放回 `ciphertext` 队首，多出的明文放回 `plaintext` 队首；
/// - `write` 把一条明文封装为单条记录，以一次 `write_all` 发出“头 + 密文 + 尾”。
///
/// ## 契约（What）
/// - `read` 返回 `Ok(0)` 表示对端关闭（收到关闭通知或套接字 EOF），此后重复调用恒为 0；
/// - 解密失败、重新协商请求、超出缓冲上限均返回 `RecordFailure`，记录流随之失效；
/// - `write` 的单次负载不得超过 [`StreamSizes::max_message`]，超出时在任何 I/O 之前报错。
///
/// ## 风险与权衡（Trade-offs）
/// - 补读时套接字返回 0 字节，本次读取返回 0，已拼接的半条记录放回 `ciphertext`；
/// - 套接字读错误同样会先归还半条记录，再透传错误。
pub struct RecordCodec<C: SecurityContext> {
    context: C,
    sizes: StreamSizes,
    limits: CodecLimits,
    ciphertext: ByteQueue,
    plaintext: ByteQueue,
    peer_closed: bool,
    poisoned: bool,
}

impl<C: SecurityContext> RecordCodec<C> {
    /// 以握手产物构造记录层，`leftover` 作为初始密文。
    pub fn new(context: C, limits: CodecLimits, leftover: &[u8]) -> Result<Self, TransportError> {
        let sizes = context
            .stream_sizes()
            .map_err(|status| error::record_error(STREAM_SIZES, Some(status)))?;
        let mut ciphertext = ByteQueue::with_capacity(sizes.max_record_len());
        ciphertext.push_back(leftover);
        tracing::trace!(
            header = sizes.header,
            trailer = sizes.trailer,
            max_message = sizes.max_message,
            leftover = leftover.len(),
            "record codec ready"
        );
        Ok(Self {
            context,
            sizes,
            limits,
            ciphertext,
            plaintext: ByteQueue::new(),
            peer_closed: false,
            poisoned: false,
        })
    }

    pub fn stream_sizes(&self) -> StreamSizes {
        self.sizes
    }

    /// 单次 `write` 可接受的最大明文长度。
    pub fn max_message(&self) -> usize {
        self.sizes.max_message
    }

    pub fn pending_plaintext(&self) -> usize {
        self.plaintext.len()
    }

    pub fn pending_ciphertext(&self) -> usize {
        self.ciphertext.len()
    }

    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// 读取最多 `out.len()` 字节明文。
    pub fn read<T>(&mut self, socket: &mut T, out: &mut [u8]) -> Result<usize, TransportError>
    where
        T: Connection + ?Sized,
    {
        if out.is_empty() {
            return Ok(0);
        }
        if !self.plaintext.is_empty() {
            let count = self.plaintext.pop_front_into(out);
            tracing::trace!(count, remaining = self.plaintext.len(), "served buffered plaintext");
            return Ok(count);
        }
        if self.peer_closed {
            return Ok(0);
        }
        if self.poisoned {
            return Err(error::record_error(POISONED, None));
        }
        let result = self.read_record(socket, out);
        if let Err(err) = &result {
            if err.kind() == spark_transport::ErrorKind::RecordFailure {
                self.poisoned = true;
                self.ciphertext.clear();
            }
        }
        result
    }

    fn read_record<T>(&mut self, socket: &mut T, out: &mut [u8]) -> Result<usize, TransportError>
    where
        T: Connection + ?Sized,
    {
        loop {
            let mut input = self.initial_input(socket, out.len())?;
            if input.is_empty() {
                tracing::debug!("peer closed the underlying stream");
                return Ok(0);
            }
            let mut refills = 0usize;
            loop {
                match self.context.decrypt(&mut input) {
                    DecryptStatus::Data { data, extra } => {
                        let record_end = input.len() - extra.min(input.len());
                        if data.start > data.end || data.end > record_end {
                            return Err(error::record_error(DECRYPT, None));
                        }
                        if record_end < input.len() {
                            self.ciphertext.push_front(&input[record_end..]);
                        }
                        let plain = &input[data];
                        if plain.is_empty() {
                            tracing::trace!(extra, "record carried no application data");
                            break;
                        }
                        let count = plain.len().min(out.len());
                        out[..count].copy_from_slice(&plain[..count]);
                        if count < plain.len() {
                            self.plaintext.push_front(&plain[count..]);
                        }
                        tracing::trace!(
                            delivered = count,
                            buffered_plaintext = self.plaintext.len(),
                            buffered_ciphertext = self.ciphertext.len(),
                            "record decrypted"
                        );
                        return Ok(count);
                    }
                    DecryptStatus::IncompleteMessage => {
                        refills += 1;
                        if input.len() >= self.limits.max_pending_ciphertext {
                            tracing::warn!(
                                refills,
                                pending = input.len(),
                                limits = ?self.limits,
                                "incomplete record exceeded buffering limits"
                            );
                            return Err(error::record_error(BACKLOG, None));
                        }
                        if !self.refill(socket, &mut input)? {
                            return Ok(0);
                        }
                    }
                    DecryptStatus::ContextExpired => {
                        tracing::debug!("peer sent close notify");
                        self.peer_closed = true;
                        self.ciphertext.clear();
                        return Ok(0);
                    }
                    DecryptStatus::Renegotiate => {
                        tracing::warn!("peer requested renegotiation");
                        return Err(error::record_error(RENEGOTIATE, None));
                    }
                    DecryptStatus::Failed(status) => {
                        tracing::warn!(%status, "record decryption failed");
                        return Err(error::record_error(DECRYPT, Some(status)));
                    }
                }
            }
        }
    }

    /// 取得一条记录的起始字节：优先缓冲密文，否则读一次套接字，读取量不超过一条完整记录。
    fn initial_input<T>(&mut self, socket: &mut T, requested: usize) -> Result<Vec<u8>, TransportError>
    where
        T: Connection + ?Sized,
    {
        if !self.ciphertext.is_empty() {
            return Ok(self.ciphertext.take_all().to_vec());
        }
        let mut input = vec![0u8; requested.min(self.sizes.max_record_len()).max(1)];
        let count = socket.read(&mut input)?;
        input.truncate(count);
        Ok(input)
    }

    /// 从套接字为不完整的记录补充字节；对端不再提供数据时归还半条记录并返回 `false`。
    ///
    /// 进入时 `ciphertext` 必为空：`initial_input` 已取走全部缓冲密文。
    fn refill<T>(&mut self, socket: &mut T, input: &mut Vec<u8>) -> Result<bool, TransportError>
    where
        T: Connection + ?Sized,
    {
        debug_assert!(self.ciphertext.is_empty());
        let room = self.limits.max_pending_ciphertext.saturating_sub(input.len()).max(1);
        let start = input.len();
        input.resize(start + self.sizes.max_record_len().min(room).max(1), 0);
        let count = match socket.read(&mut input[start..]) {
            Ok(count) => count,
            Err(err) => {
                input.truncate(start);
                self.ciphertext.push_front(&input[..]);
                return Err(err);
            }
        };
        input.truncate(start + count);
        if count == 0 {
            tracing::debug!(pending = input.len(), "stream ended inside a record");
            self.ciphertext.push_front(&input[..]);
            return Ok(false);
        }
        Ok(true)
    }

    /// 将 `data` 封装为一条记录并完整发出，返回写入的明文字节数。
    pub fn write<T>(&mut self, socket: &mut T, data: &[u8]) -> Result<usize, TransportError>
    where
        T: Connection + ?Sized,
    {
        if data.is_empty() {
            return Ok(0);
        }
        if self.poisoned {
            return Err(error::record_error(POISONED, None));
        }
        if data.len() > self.sizes.max_message {
            return Err(error::record_error(PAYLOAD_TOO_LARGE, None));
        }
        let StreamSizes { header, trailer, .. } = self.sizes;
        let mut record = vec![0u8; header + data.len() + trailer];
        record[header..header + data.len()].copy_from_slice(data);
        let sealed = self
            .context
            .encrypt(&mut record, &self.sizes, data.len())
            .map_err(|status| {
                tracing::warn!(%status, "record encryption failed");
                error::record_error(ENCRYPT, Some(status))
            })?;
        let total = compact(&mut record, &self.sizes, data.len(), sealed)
            .ok_or_else(|| error::record_error(ENCRYPT, None))?;
        socket.write_all(&record[..total])?;
        tracing::trace!(plaintext = data.len(), wire = total, "record sent");
        Ok(data.len())
    }
}

/// 把原语实际填充的三段移动为连续字节，返回总长度。
///
/// 数据段必须恰好覆盖整个明文，`write` 才能如实报告写入量；头尾越界或数据被截短时返回 `None`。
fn compact(record: &mut [u8], sizes: &StreamSizes, payload_len: usize, sealed: SealedLengths) -> Option<usize> {
    if sealed.header > sizes.header
        || sealed.data != payload_len
        || sealed.trailer > sizes.trailer
        || sealed.total() > record.len()
    {
        return None;
    }
    let data_start = sizes.header;
    let trailer_start = sizes.header + payload_len;
    record.copy_within(data_start..data_start + sealed.data, sealed.header);
    let trailer_dest = sealed.header + sealed.data;
    record.copy_within(trailer_start..trailer_start + sealed.trailer, trailer_dest);
    Some(sealed.total())
}

#[cfg(test)]
mod tests {
    use super::compact;
    use crate::provider::{SealedLengths, StreamSizes};

    #[test]
    fn compact_is_identity_when_every_region_is_full() {
        let sizes = StreamSizes {
            header: 2,
            trailer: 2,
            max_message: 16,
        };
        let mut record = *b"HHdataTT";
        let total = compact(
            &mut record,
            &sizes,
            4,
            SealedLengths {
                header: 2,
                data: 4,
                trailer: 2,
            },
        );
        assert_eq!(total, Some(8));
        assert_eq!(&record, b"HHdataTT");
    }

    #[test]
    fn compact_closes_gaps_left_by_short_regions() {
        let sizes = StreamSizes {
            header: 3,
            trailer: 4,
            max_message: 16,
        };
        let mut record = *b"HH-dataTT--";
        let total = compact(
            &mut record,
            &sizes,
            4,
            SealedLengths {
                header: 2,
                data: 4,
                trailer: 2,
            },
        )
        .expect("regions fit");
        assert_eq!(&record[..total], b"HHdataTT");
    }

    #[test]
    fn compact_rejects_truncated_data_region() {
        let sizes = StreamSizes {
            header: 2,
            trailer: 2,
            max_message: 16,
        };
        let mut record = *b"HHdataTT";
        let sealed = SealedLengths {
            header: 2,
            data: 3,
            trailer: 2,
        };
        assert_eq!(compact(&mut record, &sizes, 4, sealed), None);
    }

    #[test]
    fn compact_rejects_regions_larger_than_reserved() {
        let sizes = StreamSizes {
            header: 2,
            trailer: 2,
            max_message: 16,
        };
        let mut record = [0u8; 8];
        let sealed = SealedLengths {
            header: 3,
            data: 4,
            trailer: 2,
        };
        assert_eq!(compact(&mut record, &sizes, 4, sealed), None);
    }
}
