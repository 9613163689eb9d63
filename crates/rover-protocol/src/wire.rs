//! 长度前缀帧编解码
//!
//! 外部链路是纯字节流，接收方依赖 `[4 字节小端长度][JSON 负载]`
//! 的前缀定界，无需扫描分隔符。
//!
//! 解码器是增量式的：`feed()` 喂入任意大小的字节块，
//! `next_frame()` 在凑齐一帧后产出消息。单帧解析失败只消耗
//! 该帧的字节，解码器保持可用。

use crate::ProtocolError;
use crate::message::Message;
use bytes::{Buf, BytesMut};

/// 长度前缀字节数
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// 单帧负载上限
///
/// 正常消息在几百字节以内；超出上限视为失步或畸形输入。
pub const MAX_FRAME_LEN: usize = 16 * 1024;

/// 将消息编码为一帧（长度前缀 + JSON 负载）
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(msg)?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// 增量帧解码器
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(512),
        }
    }

    /// 喂入链路读到的字节
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 缓冲中尚未消费的字节数
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// 尝试取出下一帧
    ///
    /// - `Ok(None)`：字节不足，等待更多输入
    /// - `Ok(Some(msg))`：完整一帧解析成功
    /// - `Err(_)`：当前帧畸形，其字节已被消费，可继续调用
    pub fn next_frame(&mut self) -> Result<Option<Message>, ProtocolError> {
        if self.buf.len() < LENGTH_PREFIX_BYTES {
            return Ok(None);
        }

        let declared =
            u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;

        if declared == 0 {
            self.buf.advance(LENGTH_PREFIX_BYTES);
            return Err(ProtocolError::EmptyFrame);
        }
        if declared > MAX_FRAME_LEN {
            // 前缀不可信，丢弃整个缓冲重新同步
            self.buf.clear();
            return Err(ProtocolError::Oversized {
                declared,
                max: MAX_FRAME_LEN,
            });
        }
        if self.buf.len() < LENGTH_PREFIX_BYTES + declared {
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_BYTES);
        let body = self.buf.split_to(declared);
        let msg = serde_json::from_slice::<Message>(&body)?;
        Ok(Some(msg))
    }

    /// 流关闭时调用：残留的不完整帧视为解析失败
    pub fn finish(&mut self) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let (declared, available) = if self.buf.len() >= LENGTH_PREFIX_BYTES {
            let declared =
                u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
            (declared, self.buf.len() - LENGTH_PREFIX_BYTES)
        } else {
            (0, self.buf.len())
        };
        self.buf.clear();
        Err(ProtocolError::Truncated {
            declared,
            available,
        })
    }
}
