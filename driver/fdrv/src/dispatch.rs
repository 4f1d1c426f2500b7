//! 接收帧派发
//!
//! 解析每个收到的帧并按消息号分发：指示走 [`IndicationHandler`] 回调，
//! 发送确认在内部释放发送信用，命中等待号的帧整体拷入事件槽。
//! 回调拿到的都是借用视图，只在调用期间有效；需要异步消费的数据
//! 必须由回调自行拷出。

use bsp::{Error, EventSlot, Result};
use pool::TxCredit;

use crate::context::{status_flags, DeviceContext};
use crate::hif::{self, ind_id, msg_id, MSG_ID_MASK};
use crate::wfm::{
    self, ApClientDisconnectedInd, ConnectInd, DisconnectInd, ReceivedInd, ScanResultInd,
    StartupInd,
};

/// 指示回调接口（外部协作者，如网络栈胶合层）。
/// 默认实现全部为空操作，上层只需覆写关心的事件
pub trait IndicationHandler: Send + Sync {
    /// 站点连接结果（status 0 = 成功）
    fn on_connect(&self, _ind: &ConnectInd) {}
    fn on_disconnect(&self, _ind: &DisconnectInd) {}
    /// 软 AP 启动结果（status 0 = 成功）
    fn on_ap_started(&self, _status: u32) {}
    fn on_ap_stopped(&self) {}
    /// 收到以太帧。`frame` 仅在本次调用内有效，异步投递需拷出
    fn on_ethernet_frame(&self, _ind: &ReceivedInd, _frame: &[u8]) {}
    /// 单条扫描结果。`ies` 为结果中的信息元素区
    fn on_scan_result(&self, _ind: &ScanResultInd, _ies: &[u8]) {}
    fn on_scan_complete(&self, _status: u32) {}
    fn on_client_connected(&self, _mac: &[u8; 6]) {}
    fn on_client_rejected(&self, _mac: &[u8; 6]) {}
    fn on_client_disconnected(&self, _ind: &ApClientDisconnectedInd) {}
    /// 设备启动完成（驱动已记录 MAC 与缓冲容量后调用）
    fn on_startup(&self, _ind: &StartupInd) {}
    fn on_generic_status(&self, _body: &[u8]) {}
    /// 固件异常转储。设备已不可用，需复位恢复
    fn on_exception(&self, _data: &[u8]) {}
    /// 固件错误报告
    fn on_error(&self, _error_type: u32, _data: &[u8]) {}
}

/// 空操作处理器（测试与最小宿主用）
pub struct NullHandler;

impl IndicationHandler for NullHandler {}

/// 派发一个收到的帧。`frame` 为完整消息（含头，不含总线 trailer）。
///
/// 返回值只报告本帧的解析结果；回调内部的失败不在此层表达。
/// 无论派发结果如何，缓冲的归还由调用方（接收环）负责，恰好一次。
pub fn dispatch(
    ctx: &mut DeviceContext,
    event: &mut EventSlot,
    credit: &mut TxCredit,
    handler: &dyn IndicationHandler,
    frame: &[u8],
) -> Result<()> {
    let header = hif::parse_header(frame)?;
    let body = &frame[hif::HEADER_SIZE..header.length as usize];
    let raw_id = frame[2];

    if header.indication {
        dispatch_indication(ctx, credit, handler, raw_id, body)?;
    } else if raw_id == msg_id::SEND_FRAME {
        // 发送确认在锁内释放信用，不经回调
        if let Some(cnf) = wfm::parse_send_frame_cnf(body) {
            if cnf.status == hif::status::SUCCESS {
                credit.release();
            } else {
                log::warn!(target: "wireless::fdrv::rx", "send frame cnf status 0x{:x} (packet {})", cnf.status, cnf.packet_id);
            }
        }
    }

    // 类型无关：命中等待号（按 7 位 ID）就整帧投递给事件槽
    if event.waited() == Some(raw_id & MSG_ID_MASK) {
        event.complete(raw_id & MSG_ID_MASK, frame)?;
    }
    Ok(())
}

fn dispatch_indication(
    ctx: &mut DeviceContext,
    credit: &mut TxCredit,
    handler: &dyn IndicationHandler,
    raw_id: u8,
    body: &[u8],
) -> Result<()> {
    match raw_id {
        ind_id::STARTUP => {
            if let Some(ind) = wfm::parse_startup_ind(body) {
                ctx.mac_addr = ind.mac_addr;
                ctx.set_flag(status_flags::STARTED);
                // 上限按设备值减一，保证控制命令永远有入口缓冲可用
                credit.set_limit(ind.num_inp_ch_bufs.saturating_sub(1));
                log::info!(target: "wireless::fdrv::rx", "startup: status 0x{:x}, {} input buffers x {}B", ind.status, ind.num_inp_ch_bufs, ind.size_inp_ch_buf);
                handler.on_startup(&ind);
            } else {
                return Err(Error::Protocol(bsp::ProtocolViolation::BadHeader));
            }
        }
        ind_id::CONNECT => {
            if let Some(ind) = wfm::parse_connect_ind(body) {
                if ind.status == hif::status::SUCCESS {
                    ctx.set_flag(status_flags::STA_CONNECTED);
                }
                handler.on_connect(&ind);
            }
        }
        ind_id::DISCONNECT => {
            if let Some(ind) = wfm::parse_disconnect_ind(body) {
                ctx.clear_flag(status_flags::STA_CONNECTED);
                handler.on_disconnect(&ind);
            }
        }
        ind_id::START_AP => {
            if let Some(status) = wfm::parse_status_ind(body) {
                if status == hif::status::SUCCESS {
                    ctx.set_flag(status_flags::AP_UP);
                }
                handler.on_ap_started(status);
            }
        }
        ind_id::STOP_AP => {
            ctx.clear_flag(status_flags::AP_UP);
            handler.on_ap_stopped();
        }
        ind_id::RECEIVED => {
            if let Some(ind) = wfm::parse_received_ind(body) {
                // 仅数据帧上交网络栈
                if ind.frame_type == 0 {
                    let frame =
                        &body[ind.frame_offset..ind.frame_offset + ind.frame_length as usize];
                    handler.on_ethernet_frame(&ind, frame);
                }
            }
        }
        ind_id::SCAN_RESULT => {
            if let Some(ind) = wfm::parse_scan_result_ind(body) {
                let ies = &body[ind.ie_offset
                    ..(ind.ie_offset + ind.ie_data_length as usize).min(body.len())];
                handler.on_scan_result(&ind, ies);
            }
        }
        ind_id::SCAN_COMPLETE => {
            if let Some(status) = wfm::parse_status_ind(body) {
                handler.on_scan_complete(status);
            }
        }
        ind_id::AP_CLIENT_CONNECTED => {
            if let Some(mac) = wfm::parse_ap_client_mac_ind(body) {
                handler.on_client_connected(&mac);
            }
        }
        ind_id::AP_CLIENT_REJECTED => {
            if let Some(mac) = wfm::parse_ap_client_mac_ind(body) {
                handler.on_client_rejected(&mac);
            }
        }
        ind_id::AP_CLIENT_DISCONNECTED => {
            if let Some(ind) = wfm::parse_ap_client_disconnected_ind(body) {
                handler.on_client_disconnected(&ind);
            }
        }
        ind_id::GENERIC => {
            handler.on_generic_status(body);
        }
        ind_id::EXCEPTION => {
            log::warn!(target: "wireless::fdrv::rx", "device exception, {} bytes of dump", body.len());
            handler.on_exception(body);
        }
        ind_id::ERROR => {
            let error_type = if body.len() >= 4 {
                u32::from_le_bytes([body[0], body[1], body[2], body[3]])
            } else {
                0
            };
            log::warn!(target: "wireless::fdrv::rx", "device error 0x{:x}", error_type);
            handler.on_error(error_type, body.get(4..).unwrap_or(&[]));
        }
        other => {
            log::debug!(target: "wireless::fdrv::rx", "unhandled indication 0x{:02x}", other);
        }
    }
    Ok(())
}
