//! 主机接口消息编解码
//!
//! 通用消息头固定 4 字节：
//! - byte 0..2：消息总长（含头），小端，恒为偶数且 >= 4
//! - byte 2：bit0..7 = 7 位消息 ID，bit7 = 指示标志（0 请求/确认，1 指示）
//! - byte 3：bit0 保留，bit1..3 接口号，bit3..6 主机序号，bit6..8 安全链路模式
//!
//! 编解码全部用显式移位/掩码，不依赖任何位域布局。

use bsp::{Error, ProtocolViolation, Result};

/// 消息头长度
pub const HEADER_SIZE: usize = 4;
/// 7 位消息 ID 掩码
pub const MSG_ID_MASK: u8 = 0x7F;
/// 指示标志位
pub const MSG_TYPE_INDICATION: u8 = 0x80;

const INFO_IFACE_MASK: u8 = 0x06;
const INFO_SEQ_SHIFT: u8 = 3;
const INFO_SEQ_MASK: u8 = 0x07;
const INFO_SECLINK_SHIFT: u8 = 6;

/// 主机序号回绕范围（info 字节中 3 位）
pub const SEQ_RANGE: u8 = 0x08;

/// 无线接口。数值即 info 字节中的原始编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Interface {
    /// 接口 0：站点
    Station = 0x00,
    /// 接口 1：软 AP
    SoftAp = 0x02,
}

impl Interface {
    fn from_info(info: u8) -> Self {
        if info & INFO_IFACE_MASK == Interface::SoftAp as u8 {
            Interface::SoftAp
        } else {
            Interface::Station
        }
    }
}

/// 请求/确认 ID（7 位）
pub mod msg_id {
    pub const CONFIGURATION: u8 = 0x09;
    pub const CONTROL_GPIO: u8 = 0x26;
    pub const PREVENT_ROLLBACK: u8 = 0x2a;
    /// 回滚保护的确认不以请求 ID 返回，而以该指示号下发（设备侧既定行为）
    pub const PREVENT_ROLLBACK_CNF: u8 = 0x67;
    pub const SHUT_DOWN: u8 = 0x32;
    pub const SET_MAC_ADDRESS: u8 = 0x42;
    pub const CONNECT: u8 = 0x43;
    pub const DISCONNECT: u8 = 0x44;
    pub const START_AP: u8 = 0x45;
    pub const UPDATE_AP: u8 = 0x46;
    pub const STOP_AP: u8 = 0x47;
    pub const SEND_FRAME: u8 = 0x4a;
    pub const START_SCAN: u8 = 0x4b;
    pub const STOP_SCAN: u8 = 0x4c;
    pub const GET_SIGNAL_STRENGTH: u8 = 0x4e;
    pub const DISCONNECT_AP_CLIENT: u8 = 0x4f;
    pub const SET_PM_MODE: u8 = 0x52;
    pub const ADD_MULTICAST_ADDR: u8 = 0x53;
    pub const REMOVE_MULTICAST_ADDR: u8 = 0x54;
    pub const SET_MAX_AP_CLIENT_COUNT: u8 = 0x55;
    pub const SET_SCAN_PARAMETERS: u8 = 0x5c;
}

/// 指示 ID（完整字节，bit7 置位）
pub mod ind_id {
    pub const CONNECT: u8 = 0xc3;
    pub const DISCONNECT: u8 = 0xc4;
    pub const START_AP: u8 = 0xc5;
    pub const STOP_AP: u8 = 0xc7;
    pub const RECEIVED: u8 = 0xca;
    pub const SCAN_RESULT: u8 = 0xcb;
    pub const SCAN_COMPLETE: u8 = 0xcc;
    pub const AP_CLIENT_CONNECTED: u8 = 0xcd;
    pub const AP_CLIENT_REJECTED: u8 = 0xce;
    pub const AP_CLIENT_DISCONNECTED: u8 = 0xcf;
    pub const EXCEPTION: u8 = 0xe0;
    pub const STARTUP: u8 = 0xe1;
    pub const GENERIC: u8 = 0xe3;
    pub const ERROR: u8 = 0xe4;
    /// 回滚保护确认（见 `msg_id::PREVENT_ROLLBACK_CNF`）
    pub const PREVENT_ROLLBACK: u8 = 0xe7;
}

/// 确认状态码
pub mod status {
    pub const SUCCESS: u32 = 0x0;
    pub const INVALID_PARAMETER: u32 = 0x1;
    pub const WRONG_STATE: u32 = 0x2;
    pub const GENERAL_FAILURE: u32 = 0x3;
    /// 部分完成类告警（如扫描提前结束），按成功处理
    pub const WARNING: u32 = 0x1000;
}

/// 已解析的消息头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    /// 消息总长（含头）
    pub length: u16,
    /// 7 位消息 ID（不含指示位）
    pub id: u8,
    /// true = 指示，false = 请求/确认
    pub indication: bool,
    pub interface: Interface,
    /// 3 位主机序号（确认中原样回带）
    pub seq: u8,
    /// 2 位安全链路模式（0 = 明文）
    pub sec_link: u8,
}

/// 总长向上取偶（帧按 16 位对齐）
#[inline]
pub const fn round_up_even(n: usize) -> usize {
    n + (n & 1)
}

/// 解析消息头。长度 < 4、非偶数或超出帧范围都算坏头
pub fn parse_header(frame: &[u8]) -> Result<MsgHeader> {
    if frame.len() < HEADER_SIZE {
        return Err(Error::Protocol(ProtocolViolation::BadHeader));
    }
    let length = u16::from_le_bytes([frame[0], frame[1]]);
    if (length as usize) < HEADER_SIZE || length & 1 != 0 || (length as usize) > frame.len() {
        return Err(Error::Protocol(ProtocolViolation::BadHeader));
    }
    let id_byte = frame[2];
    let info = frame[3];
    Ok(MsgHeader {
        length,
        id: id_byte & MSG_ID_MASK,
        indication: id_byte & MSG_TYPE_INDICATION != 0,
        interface: Interface::from_info(info),
        seq: (info >> INFO_SEQ_SHIFT) & INFO_SEQ_MASK,
        sec_link: info >> INFO_SECLINK_SHIFT,
    })
}

/// 写入 4 字节消息头（安全链路模式恒为明文 0）
pub fn encode_header(buf: &mut [u8], total_len: u16, id: u8, interface: Interface, seq: u8) {
    buf[..2].copy_from_slice(&total_len.to_le_bytes());
    buf[2] = id & MSG_ID_MASK;
    buf[3] = (interface as u8) | ((seq & INFO_SEQ_MASK) << INFO_SEQ_SHIFT);
}

/// 组装请求：填头、拷贝负载、总长向上取偶（补位字节清零）。
/// 返回最终消息长度
pub fn build_request(
    buf: &mut [u8],
    id: u8,
    interface: Interface,
    seq: u8,
    payload: &[u8],
) -> Result<usize> {
    let total = round_up_even(HEADER_SIZE + payload.len());
    if buf.len() < total {
        return Err(Error::OutOfBuffers);
    }
    encode_header(buf, total as u16, id, interface, seq);
    buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    if total > HEADER_SIZE + payload.len() {
        buf[total - 1] = 0;
    }
    Ok(total)
}

/// 确认负载（头后）前 4 字节为小端状态码
pub fn confirmation_status(frame: &[u8]) -> Result<u32> {
    let body = frame
        .get(HEADER_SIZE..HEADER_SIZE + 4)
        .ok_or(Error::Protocol(ProtocolViolation::BadHeader))?;
    Ok(u32::from_le_bytes([body[0], body[1], body[2], body[3]]))
}
