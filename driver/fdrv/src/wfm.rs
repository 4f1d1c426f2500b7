//! 全 MAC 命令体构建与指示解析
//!
//! 所有消息体为小端紧排布局，与设备固件逐字段对齐。构建函数向调用方
//! 提供的缓冲写入负载并返回长度；解析函数做长度校验，返回定长小结构
//! 的副本，变长负载（IE、以太帧）以偏移量交还借用视图。

use bsp::{Error, ProtocolViolation, Result};

/// SSID 定义：长度 u32 + 定长 32 字节名称
pub const SSID_SIZE: usize = 32;
pub const SSID_DEF_SIZE: usize = 4 + SSID_SIZE;
pub const PASSWORD_SIZE: usize = 64;
pub const MAC_SIZE: usize = 6;
pub const BSSID_SIZE: usize = 6;

/// 连接请求体定长部分
pub const CONNECT_REQ_FIXED: usize = SSID_DEF_SIZE + BSSID_SIZE + 2 + 1 + 1 + 2 + 2 + PASSWORD_SIZE + 2;
/// 启动 AP 请求体定长部分
pub const START_AP_REQ_FIXED: usize = SSID_DEF_SIZE + 1 + 1 + 1 + 1 + 2 + 2 + PASSWORD_SIZE + 2 + 2;
/// 发送帧请求体定长部分（帧数据之前）
pub const SEND_FRAME_REQ_FIXED: usize = 8;
/// 扫描请求体定长部分
pub const START_SCAN_REQ_FIXED: usize = 8;

/// 安全模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecurityMode {
    Open = 0x0,
    Wep = 0x1,
    Wpa2Wpa1Psk = 0x2,
    Wpa2Psk = 0x4,
}

/// 站点省电模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PowerMode {
    /// 不省电，始终活跃
    Active = 0x0,
    /// 按信标周期醒来
    Beacon = 0x1,
    /// 按 DTIM 周期醒来
    Dtim = 0x2,
}

/// 扫描方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ScanMode {
    Passive = 0x0,
    Active = 0x1,
}

/// 发送帧类型字段中的数据帧编码
pub const FRAME_TYPE_DATA: u8 = 0x8;

fn put(buf: &mut [u8], off: &mut usize, bytes: &[u8]) {
    buf[*off..*off + bytes.len()].copy_from_slice(bytes);
    *off += bytes.len();
}

fn put_ssid_def(buf: &mut [u8], off: &mut usize, ssid: &[u8]) {
    let len = ssid.len().min(SSID_SIZE);
    put(buf, off, &(len as u32).to_le_bytes());
    buf[*off..*off + len].copy_from_slice(&ssid[..len]);
    *off += SSID_SIZE;
}

// ============================================================================
// 请求体构建
// ============================================================================

/// 连接参数。`bssid` 为 None 时用广播地址（任意匹配的接入点）
pub struct JoinParameters<'a> {
    pub ssid: &'a [u8],
    pub bssid: Option<&'a [u8; BSSID_SIZE]>,
    /// 0 = 任意信道
    pub channel: u16,
    pub security: SecurityMode,
    pub prevent_roaming: bool,
    /// 管理帧保护：0 关闭，1 可选，2 强制
    pub mgmt_frame_protection: u16,
    pub passkey: &'a [u8],
    /// 附加到探测请求的厂商 IE
    pub ie_data: &'a [u8],
}

pub fn build_connect_req(buf: &mut [u8], p: &JoinParameters<'_>) -> usize {
    let mut off = 0;
    put_ssid_def(buf, &mut off, p.ssid);
    match p.bssid {
        Some(b) => put(buf, &mut off, b),
        None => put(buf, &mut off, &[0xFF; BSSID_SIZE]),
    }
    put(buf, &mut off, &p.channel.to_le_bytes());
    buf[off] = p.security as u8;
    buf[off + 1] = p.prevent_roaming as u8;
    off += 2;
    put(buf, &mut off, &p.mgmt_frame_protection.to_le_bytes());
    let pass_len = p.passkey.len().min(PASSWORD_SIZE);
    put(buf, &mut off, &(pass_len as u16).to_le_bytes());
    buf[off..off + pass_len].copy_from_slice(&p.passkey[..pass_len]);
    off += PASSWORD_SIZE;
    put(buf, &mut off, &(p.ie_data.len() as u16).to_le_bytes());
    put(buf, &mut off, p.ie_data);
    off
}

/// 软 AP 参数
pub struct ApParameters<'a> {
    pub ssid: &'a [u8],
    pub channel: u16,
    pub hidden_ssid: bool,
    pub client_isolation: bool,
    pub security: SecurityMode,
    /// 管理帧保护：0 关闭，1 可选，2 强制
    pub mgmt_frame_protection: u8,
    pub passkey: &'a [u8],
    pub beacon_ie_data: &'a [u8],
    pub probe_resp_ie_data: &'a [u8],
}

pub fn build_start_ap_req(buf: &mut [u8], p: &ApParameters<'_>) -> usize {
    let mut off = 0;
    put_ssid_def(buf, &mut off, p.ssid);
    buf[off] = p.hidden_ssid as u8;
    buf[off + 1] = p.client_isolation as u8;
    buf[off + 2] = p.security as u8;
    buf[off + 3] = p.mgmt_frame_protection;
    off += 4;
    put(buf, &mut off, &p.channel.to_le_bytes());
    let pass_len = p.passkey.len().min(PASSWORD_SIZE);
    put(buf, &mut off, &(pass_len as u16).to_le_bytes());
    buf[off..off + pass_len].copy_from_slice(&p.passkey[..pass_len]);
    off += PASSWORD_SIZE;
    put(buf, &mut off, &(p.beacon_ie_data.len() as u16).to_le_bytes());
    put(buf, &mut off, &(p.probe_resp_ie_data.len() as u16).to_le_bytes());
    put(buf, &mut off, p.beacon_ie_data);
    put(buf, &mut off, p.probe_resp_ie_data);
    off
}

pub fn build_update_ap_req(buf: &mut [u8], beacon_ie: &[u8], probe_resp_ie: &[u8]) -> usize {
    let mut off = 0;
    put(buf, &mut off, &(beacon_ie.len() as u16).to_le_bytes());
    put(buf, &mut off, &(probe_resp_ie.len() as u16).to_le_bytes());
    put(buf, &mut off, beacon_ie);
    put(buf, &mut off, probe_resp_ie);
    off
}

/// 发送帧请求体定长部分：类型、优先级、包号、数据长度
pub fn build_send_frame_req(
    buf: &mut [u8],
    priority: u8,
    packet_id: u16,
    frame: &[u8],
) -> usize {
    let mut off = 0;
    buf[off] = FRAME_TYPE_DATA;
    buf[off + 1] = priority;
    off += 2;
    put(buf, &mut off, &packet_id.to_le_bytes());
    put(buf, &mut off, &(frame.len() as u32).to_le_bytes());
    put(buf, &mut off, frame);
    off
}

/// 扫描参数。`ssids` 至多 2 条，只上报匹配的网络；空表上报全部
pub struct ScanParameters<'a> {
    pub mode: ScanMode,
    pub channels: &'a [u8],
    pub ssids: &'a [&'a [u8]],
    pub ie_data: &'a [u8],
}

pub fn build_start_scan_req(buf: &mut [u8], p: &ScanParameters<'_>) -> usize {
    let mut off = 0;
    put(buf, &mut off, &(p.mode as u16).to_le_bytes());
    put(buf, &mut off, &(p.channels.len() as u16).to_le_bytes());
    put(buf, &mut off, &(p.ssids.len() as u16).to_le_bytes());
    put(buf, &mut off, &(p.ie_data.len() as u16).to_le_bytes());
    put(buf, &mut off, p.channels);
    for ssid in p.ssids {
        put_ssid_def(buf, &mut off, ssid);
    }
    put(buf, &mut off, p.ie_data);
    off
}

pub fn build_set_scan_parameters_req(
    buf: &mut [u8],
    active_channel_time: u16,
    passive_channel_time: u16,
    num_probe_requests: u16,
) -> usize {
    let mut off = 0;
    put(buf, &mut off, &active_channel_time.to_le_bytes());
    put(buf, &mut off, &passive_channel_time.to_le_bytes());
    put(buf, &mut off, &num_probe_requests.to_le_bytes());
    put(buf, &mut off, &0u16.to_le_bytes());
    off
}

pub fn build_set_pm_mode_req(buf: &mut [u8], mode: PowerMode, listen_interval: u16) -> usize {
    let mut off = 0;
    put(buf, &mut off, &(mode as u16).to_le_bytes());
    put(buf, &mut off, &listen_interval.to_le_bytes());
    off
}

/// MAC 地址即全部负载的请求（组播增删、踢客户端、设 MAC）
pub fn build_mac_req(buf: &mut [u8], mac: &[u8; MAC_SIZE]) -> usize {
    buf[..MAC_SIZE].copy_from_slice(mac);
    MAC_SIZE
}

pub fn build_set_max_ap_client_count_req(buf: &mut [u8], count: u32) -> usize {
    buf[..4].copy_from_slice(&count.to_le_bytes());
    4
}

/// 设备配置数据（压缩 PDS 文本）：长度 u16 + 数据
pub fn build_configuration_req(buf: &mut [u8], pds_data: &[u8]) -> usize {
    let mut off = 0;
    put(buf, &mut off, &(pds_data.len() as u16).to_le_bytes());
    put(buf, &mut off, pds_data);
    off
}

pub fn build_control_gpio_req(buf: &mut [u8], gpio_label: u8, gpio_mode: u8) -> usize {
    buf[0] = gpio_label;
    buf[1] = gpio_mode;
    2
}

/// 回滚保护魔数，防止误触发烧写
pub const PREVENT_ROLLBACK_MAGIC: u32 = 0x5C89_12F3;

pub fn build_prevent_rollback_req(buf: &mut [u8], magic: u32) -> usize {
    buf[..4].copy_from_slice(&magic.to_le_bytes());
    4
}

// ============================================================================
// 确认/指示解析（输入均为消息体，即头后字节）
// ============================================================================

fn read_u16(body: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([body[off], body[off + 1]])
}

fn read_u32(body: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([body[off], body[off + 1], body[off + 2], body[off + 3]])
}

fn read_mac(body: &[u8], off: usize) -> [u8; MAC_SIZE] {
    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(&body[off..off + MAC_SIZE]);
    mac
}

/// 启动指示：设备上电自检结果、缓冲容量与两个接口的 MAC
#[derive(Debug, Clone, Copy)]
pub struct StartupInd {
    pub status: u32,
    pub hardware_id: u16,
    /// 请求消息可用的设备入口缓冲数
    pub num_inp_ch_bufs: u16,
    /// 单个入口缓冲的字节容量（请求消息最大长度）
    pub size_inp_ch_buf: u16,
    pub num_links_ap: u8,
    pub num_interfaces: u8,
    pub mac_addr: [[u8; MAC_SIZE]; 2],
}

/// 启动指示体定长头部（固件版本字串等后续字段不取）
const STARTUP_IND_MIN: usize = 46;

pub fn parse_startup_ind(body: &[u8]) -> Option<StartupInd> {
    if body.len() < STARTUP_IND_MIN {
        return None;
    }
    Some(StartupInd {
        status: read_u32(body, 0),
        hardware_id: read_u16(body, 4),
        // opn[14] @6, uid[8] @20
        num_inp_ch_bufs: read_u16(body, 28),
        size_inp_ch_buf: read_u16(body, 30),
        num_links_ap: body[32],
        num_interfaces: body[33],
        mac_addr: [read_mac(body, 34), read_mac(body, 40)],
    })
}

/// 连接指示：status 为 0 表示已接入
#[derive(Debug, Clone, Copy)]
pub struct ConnectInd {
    pub status: u32,
    pub mac: [u8; MAC_SIZE],
    pub channel: u16,
    pub beacon_interval: u8,
    pub dtim_period: u8,
    pub max_phy_rate: u16,
}

pub fn parse_connect_ind(body: &[u8]) -> Option<ConnectInd> {
    if body.len() < 16 {
        return None;
    }
    Some(ConnectInd {
        status: read_u32(body, 0),
        mac: read_mac(body, 4),
        channel: read_u16(body, 10),
        beacon_interval: body[12],
        dtim_period: body[13],
        max_phy_rate: read_u16(body, 14),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct DisconnectInd {
    pub mac: [u8; MAC_SIZE],
    pub reason: u16,
}

pub fn parse_disconnect_ind(body: &[u8]) -> Option<DisconnectInd> {
    if body.len() < 8 {
        return None;
    }
    Some(DisconnectInd {
        mac: read_mac(body, 0),
        reason: read_u16(body, 6),
    })
}

/// 扫描结果指示：一条即一个接入点
#[derive(Debug, Clone, Copy)]
pub struct ScanResultInd {
    pub ssid_len: u8,
    pub ssid: [u8; SSID_SIZE],
    pub mac: [u8; MAC_SIZE],
    pub channel: u16,
    /// 接收信道功率指示：0..220，220 对应 0 dBm，步进 0.5 dBm
    pub rcpi: u16,
    /// IE 数据在体内的起始偏移与长度
    pub ie_data_length: u16,
    pub ie_offset: usize,
}

const SCAN_RESULT_FIXED: usize = SSID_DEF_SIZE + MAC_SIZE + 2 + 4 + 2 + 2;

pub fn parse_scan_result_ind(body: &[u8]) -> Option<ScanResultInd> {
    if body.len() < SCAN_RESULT_FIXED {
        return None;
    }
    let ssid_len = (read_u32(body, 0) as usize).min(SSID_SIZE) as u8;
    let mut ssid = [0u8; SSID_SIZE];
    ssid.copy_from_slice(&body[4..4 + SSID_SIZE]);
    Some(ScanResultInd {
        ssid_len,
        ssid,
        mac: read_mac(body, SSID_DEF_SIZE),
        channel: read_u16(body, SSID_DEF_SIZE + 6),
        // reserved u32 @ +8
        rcpi: read_u16(body, SSID_DEF_SIZE + 12),
        ie_data_length: read_u16(body, SSID_DEF_SIZE + 14),
        ie_offset: SCAN_RESULT_FIXED,
    })
}

/// 仅含 u32 状态的指示体（扫描完成、AP 启动结果）
pub fn parse_status_ind(body: &[u8]) -> Option<u32> {
    if body.len() < 4 {
        return None;
    }
    Some(read_u32(body, 0))
}

/// 收到的以太帧：帧本体在体内 `4 + frame_padding` 处
#[derive(Debug, Clone, Copy)]
pub struct ReceivedInd {
    pub frame_type: u8,
    pub frame_length: u16,
    pub frame_offset: usize,
}

pub fn parse_received_ind(body: &[u8]) -> Option<ReceivedInd> {
    if body.len() < 4 {
        return None;
    }
    let frame_padding = body[1] as usize;
    let frame_length = read_u16(body, 2);
    let frame_offset = 4 + frame_padding;
    if body.len() < frame_offset + frame_length as usize {
        return None;
    }
    Some(ReceivedInd {
        frame_type: body[0],
        frame_length,
        frame_offset,
    })
}

pub fn parse_ap_client_mac_ind(body: &[u8]) -> Option<[u8; MAC_SIZE]> {
    if body.len() < MAC_SIZE {
        return None;
    }
    Some(read_mac(body, 0))
}

#[derive(Debug, Clone, Copy)]
pub struct ApClientDisconnectedInd {
    pub mac: [u8; MAC_SIZE],
    pub reason: u16,
}

pub fn parse_ap_client_disconnected_ind(body: &[u8]) -> Option<ApClientDisconnectedInd> {
    if body.len() < 8 {
        return None;
    }
    Some(ApClientDisconnectedInd {
        mac: read_mac(body, 0),
        reason: read_u16(body, 6),
    })
}

/// 发送帧确认：status + 回带的包号
#[derive(Debug, Clone, Copy)]
pub struct SendFrameCnf {
    pub status: u32,
    pub packet_id: u16,
}

pub fn parse_send_frame_cnf(body: &[u8]) -> Option<SendFrameCnf> {
    if body.len() < 6 {
        return None;
    }
    Some(SendFrameCnf {
        status: read_u32(body, 0),
        packet_id: read_u16(body, 4),
    })
}

/// 信号强度确认
pub fn parse_signal_strength_cnf(body: &[u8]) -> Result<u32> {
    if body.len() < 8 {
        return Err(Error::Protocol(ProtocolViolation::BadHeader));
    }
    Ok(read_u32(body, 4))
}
