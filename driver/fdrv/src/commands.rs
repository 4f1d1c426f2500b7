//! 命令面：向上暴露的同步命令
//!
//! 统一骨架都在 [`WifiDevice::send_command`]：建请求、arm 确认等待、
//! 写队列、锁外等待、查状态码。本文件只负责各命令的参数组包与
//! 确认解析。失败一律以类型化错误返回且不改动状态标志，重试安全。

use bsp::{Error, EventPayload, HostOps, Register, Result, Transport, CONT_WUP_BIT,
    DEFAULT_REQUEST_TIMEOUT_MS};

use crate::context::status_flags;
use crate::device::WifiDevice;
use crate::hif::{self, msg_id, Interface};
use crate::wfm::{
    self, ApParameters, JoinParameters, PowerMode, ScanParameters, MAC_SIZE,
};

/// 命令体组装暂存区（控制池块大小）
const CMD_BODY_MAX: usize = 512;

impl<T: Transport, H: HostOps> WifiDevice<T, H> {
    /// 站点模式加入网络。确认只表示请求被接受，最终结果由连接指示给出
    pub fn join(&self, params: &JoinParameters<'_>) -> Result<()> {
        if wfm::CONNECT_REQ_FIXED + params.ie_data.len() > CMD_BODY_MAX {
            return Err(Error::OutOfBuffers);
        }
        let mut body = [0u8; CMD_BODY_MAX];
        let len = wfm::build_connect_req(&mut body, params);
        self.send_command_checked(msg_id::CONNECT, Interface::Station, &body[..len])
    }

    /// 断开与接入点的连接
    pub fn disconnect(&self) -> Result<()> {
        self.send_command_checked(msg_id::DISCONNECT, Interface::Station, &[])
    }

    /// 启动软 AP
    pub fn start_ap(&self, params: &ApParameters<'_>) -> Result<()> {
        let ie_len = params.beacon_ie_data.len() + params.probe_resp_ie_data.len();
        if wfm::START_AP_REQ_FIXED + ie_len > CMD_BODY_MAX {
            return Err(Error::OutOfBuffers);
        }
        let mut body = [0u8; CMD_BODY_MAX];
        let len = wfm::build_start_ap_req(&mut body, params);
        self.send_command_checked(msg_id::START_AP, Interface::SoftAp, &body[..len])
    }

    /// 更新软 AP 的信标/探测响应 IE
    pub fn update_ap(&self, beacon_ie: &[u8], probe_resp_ie: &[u8]) -> Result<()> {
        if 4 + beacon_ie.len() + probe_resp_ie.len() > CMD_BODY_MAX {
            return Err(Error::OutOfBuffers);
        }
        let mut body = [0u8; CMD_BODY_MAX];
        let len = wfm::build_update_ap_req(&mut body, beacon_ie, probe_resp_ie);
        self.send_command_checked(msg_id::UPDATE_AP, Interface::SoftAp, &body[..len])
    }

    /// 停止软 AP
    pub fn stop_ap(&self) -> Result<()> {
        self.send_command_checked(msg_id::STOP_AP, Interface::SoftAp, &[])
    }

    /// 启动扫描。设备接受部分完成类告警状态，结果逐条经指示上报
    pub fn start_scan(&self, params: &ScanParameters<'_>) -> Result<()> {
        let scan_len = wfm::START_SCAN_REQ_FIXED
            + params.channels.len()
            + params.ssids.len() * wfm::SSID_DEF_SIZE
            + params.ie_data.len();
        if scan_len > CMD_BODY_MAX {
            return Err(Error::OutOfBuffers);
        }
        let mut body = [0u8; CMD_BODY_MAX];
        let len = wfm::build_start_scan_req(&mut body, params);
        let reply =
            self.send_command(msg_id::START_SCAN, Interface::Station, &body[..len], DEFAULT_REQUEST_TIMEOUT_MS)?;
        let code = hif::confirmation_status(reply.data())?;
        if code != hif::status::SUCCESS && code != hif::status::WARNING {
            return Err(Error::DeviceStatus(code));
        }
        Ok(())
    }

    /// 中止进行中的扫描
    pub fn stop_scan(&self) -> Result<()> {
        self.send_command_checked(msg_id::STOP_SCAN, Interface::Station, &[])
    }

    /// 最近收包的平均信号强度（RCPI：0..220，220 = 0 dBm，步进 0.5 dBm）
    pub fn get_signal_strength(&self) -> Result<u32> {
        let reply = self.send_command(
            msg_id::GET_SIGNAL_STRENGTH,
            Interface::Station,
            &[],
            DEFAULT_REQUEST_TIMEOUT_MS,
        )?;
        let code = hif::confirmation_status(reply.data())?;
        if code != hif::status::SUCCESS {
            return Err(Error::DeviceStatus(code));
        }
        wfm::parse_signal_strength_cnf(&reply.data()[hif::HEADER_SIZE..])
    }

    /// 设定站点省电模式（须在连接建立后调用）
    pub fn set_power_mode(&self, mode: PowerMode, listen_interval: u16) -> Result<()> {
        let mut body = [0u8; 4];
        let len = wfm::build_set_pm_mode_req(&mut body, mode, listen_interval);
        self.send_command_checked(msg_id::SET_PM_MODE, Interface::Station, &body[..len])?;
        let mut guard = self.inner.lock();
        if mode == PowerMode::Active {
            guard.ctx.clear_flag(status_flags::POWER_SAVE_ACTIVE);
        } else {
            guard.ctx.set_flag(status_flags::POWER_SAVE_ACTIVE);
        }
        Ok(())
    }

    /// 把组播地址加入过滤白名单
    pub fn add_multicast_address(&self, mac: &[u8; MAC_SIZE], interface: Interface) -> Result<()> {
        let mut body = [0u8; MAC_SIZE];
        let len = wfm::build_mac_req(&mut body, mac);
        self.send_command_checked(msg_id::ADD_MULTICAST_ADDR, interface, &body[..len])
    }

    pub fn remove_multicast_address(&self, mac: &[u8; MAC_SIZE], interface: Interface) -> Result<()> {
        let mut body = [0u8; MAC_SIZE];
        let len = wfm::build_mac_req(&mut body, mac);
        self.send_command_checked(msg_id::REMOVE_MULTICAST_ADDR, interface, &body[..len])
    }

    /// 软 AP 允许的最大客户端数（须在 start_ap 之后设置）
    pub fn set_max_ap_clients(&self, count: u32) -> Result<()> {
        let mut body = [0u8; 4];
        let len = wfm::build_set_max_ap_client_count_req(&mut body, count);
        self.send_command_checked(msg_id::SET_MAX_AP_CLIENT_COUNT, Interface::SoftAp, &body[..len])
    }

    /// 设定接口 MAC 地址（覆盖出厂值）
    pub fn set_mac_address(&self, mac: &[u8; MAC_SIZE], interface: Interface) -> Result<()> {
        let mut body = [0u8; MAC_SIZE];
        let len = wfm::build_mac_req(&mut body, mac);
        self.send_command_checked(msg_id::SET_MAC_ADDRESS, interface, &body[..len])
    }

    /// 软 AP 模式踢掉指定客户端
    pub fn disconnect_ap_client(&self, mac: &[u8; MAC_SIZE]) -> Result<()> {
        let mut body = [0u8; MAC_SIZE];
        let len = wfm::build_mac_req(&mut body, mac);
        self.send_command_checked(msg_id::DISCONNECT_AP_CLIENT, Interface::SoftAp, &body[..len])
    }

    /// 配置此后每次扫描的驻留时间与探测请求数（0 = 固件默认）
    pub fn set_scan_parameters(
        &self,
        active_channel_time: u16,
        passive_channel_time: u16,
        num_probe_requests: u16,
    ) -> Result<()> {
        let mut body = [0u8; 8];
        let len = wfm::build_set_scan_parameters_req(
            &mut body,
            active_channel_time,
            passive_channel_time,
            num_probe_requests,
        );
        self.send_command_checked(msg_id::SET_SCAN_PARAMETERS, Interface::Station, &body[..len])
    }

    /// 下发一段压缩格式的设备配置数据
    pub fn send_configuration(&self, pds_data: &str) -> Result<()> {
        if 2 + pds_data.len() > CMD_BODY_MAX {
            return Err(Error::OutOfBuffers);
        }
        let mut body = [0u8; CMD_BODY_MAX];
        let len = wfm::build_configuration_req(&mut body, pds_data.as_bytes());
        self.send_command_checked(msg_id::CONFIGURATION, Interface::Station, &body[..len])
    }

    /// 读写由设备配置定义的 GPIO，返回读值或错误详情
    pub fn control_gpio(&self, gpio_label: u8, gpio_mode: u8) -> Result<u32> {
        let mut body = [0u8; 2];
        let len = wfm::build_control_gpio_req(&mut body, gpio_label, gpio_mode);
        let reply = self.send_command(
            msg_id::CONTROL_GPIO,
            Interface::Station,
            &body[..len],
            DEFAULT_REQUEST_TIMEOUT_MS,
        )?;
        let code = hif::confirmation_status(reply.data())?;
        if code != hif::status::SUCCESS {
            return Err(Error::DeviceStatus(code));
        }
        let data = reply.data();
        let value = data
            .get(hif::HEADER_SIZE + 4..hif::HEADER_SIZE + 8)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0);
        Ok(value)
    }

    /// 烧断回滚保护熔丝。确认以独立的指示号返回；设备拒绝时
    /// 以 `FirmwareRollbackRejected` 上抛
    pub fn prevent_rollback(&self, magic: u32) -> Result<()> {
        let mut body = [0u8; 4];
        let len = wfm::build_prevent_rollback_req(&mut body, magic);
        let reply = self.send_command(
            msg_id::PREVENT_ROLLBACK,
            Interface::Station,
            &body[..len],
            DEFAULT_REQUEST_TIMEOUT_MS,
        )?;
        let code = hif::confirmation_status(reply.data())?;
        if code != hif::status::SUCCESS {
            return Err(Error::FirmwareRollbackRejected);
        }
        Ok(())
    }

    /// 关闭设备：发关机请求（无确认），清控制寄存器 WUP 位与唤醒脚。
    /// 再次通信前需要完整重启
    pub fn shut_down(&self) -> Result<()> {
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let seq = inner.ctx.next_seq();
            let mut msg = [0u8; hif::HEADER_SIZE];
            hif::encode_header(&mut msg, hif::HEADER_SIZE as u16, msg_id::SHUT_DOWN, Interface::Station, seq);
            inner.bus.write_queue(&msg, msg.len())?;

            let control = inner.bus.read_16(Register::Control)?;
            inner.bus.write_16(Register::Control, control & !CONT_WUP_BIT)?;
            inner.ctx.set_flag(status_flags::SLEEPING);
        }
        self.host.set_wake_up_pin(false);
        log::info!(target: "wireless::fdrv", "device shut down");
        Ok(())
    }

    /// 透传任意请求号与负载，等待并返回确认副本。
    /// 未单独封装的命令走这里
    pub fn send_raw_command(
        &self,
        id: u8,
        payload: &[u8],
        interface: Interface,
    ) -> Result<EventPayload> {
        self.send_command(id, interface, payload, DEFAULT_REQUEST_TIMEOUT_MS)
    }
}
