//! 事件关联器：同步命令的单槽等待原语
//!
//! 状态机 `Idle -> Armed(id) -> Matched / 超时`。一次只允许一个未决等待；
//! 匹配按 7 位消息 ID 进行，因此 arm 某条请求后，对应确认或同号指示
//! 都能结束等待。负载在匹配时整体拷贝进暂存区，随取随走。

use crate::error::{Error, ProtocolViolation, Result};

/// 事件负载暂存区容量。等待中的确认超过该容量按协议错误处理
pub const EVENT_PAYLOAD_CAPACITY: usize = 512;

/// 匹配到的确认/指示负载副本（含消息头）
#[derive(Clone, Debug, PartialEq)]
pub struct EventPayload {
    buf: [u8; EVENT_PAYLOAD_CAPACITY],
    len: usize,
}

impl EventPayload {
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// 单槽等待：`waited` 由命令路径 arm，`posted` 由派发路径写入
pub struct EventSlot {
    waited_id: Option<u8>,
    posted_id: Option<u8>,
    payload: [u8; EVENT_PAYLOAD_CAPACITY],
    payload_len: usize,
}

impl EventSlot {
    pub const fn new() -> Self {
        Self {
            waited_id: None,
            posted_id: None,
            payload: [0; EVENT_PAYLOAD_CAPACITY],
            payload_len: 0,
        }
    }

    /// 布设对 `id`（7 位）的等待。已有未决等待时拒绝：
    /// 同一时刻最多一个同步调用在途
    pub fn arm(&mut self, id: u8) -> Result<()> {
        if let Some(pending) = self.waited_id {
            log::warn!(target: "wireless::bsp::event", "arm 0x{:02x} while 0x{:02x} pending", id, pending);
            return Err(Error::WaitAlreadyArmed);
        }
        self.waited_id = Some(id);
        self.posted_id = None;
        Ok(())
    }

    /// 撤销等待（超时路径）
    pub fn disarm(&mut self) {
        self.waited_id = None;
        self.posted_id = None;
    }

    pub fn waited(&self) -> Option<u8> {
        self.waited_id
    }

    /// 派发路径命中等待 id 时调用，整帧拷入暂存区。
    /// 超出容量不截断，按协议错误上抛（等待将继续直至超时）
    pub fn complete(&mut self, id: u8, frame: &[u8]) -> Result<()> {
        if frame.len() > EVENT_PAYLOAD_CAPACITY {
            return Err(Error::Protocol(ProtocolViolation::OversizedConfirmation));
        }
        self.payload[..frame.len()].copy_from_slice(frame);
        self.payload_len = frame.len();
        self.posted_id = Some(id);
        Ok(())
    }

    /// 已匹配则取走负载并回到 Idle
    pub fn take_matched(&mut self) -> Option<EventPayload> {
        if self.waited_id.is_some() && self.posted_id == self.waited_id {
            let payload = EventPayload {
                buf: self.payload,
                len: self.payload_len,
            };
            self.disarm();
            Some(payload)
        } else {
            None
        }
    }
}

impl Default for EventSlot {
    fn default() -> Self {
        Self::new()
    }
}
