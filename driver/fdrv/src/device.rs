//! 设备句柄：锁、接收环与同步等待
//!
//! 每个受管设备一个 [`WifiDevice`] 句柄，多设备即多句柄，没有全局
//! 状态。句柄内部是单一总线锁护住的 { 寄存器总线、缓冲池、信用、
//! 事件槽、上下文 }；平台的中断工作线程在设备有数据时调用
//! [`WifiDevice::process_interrupt`]，命令线程经同一把锁发请求。
//! 等待确认的睡眠在锁外进行，收包线程不会被饿死。

use alloc::sync::Arc;

use bsp::{
    fw_load, Error, EventPayload, EventSlot, FirmwareSource, HostOps, Register, RegisterBus,
    Transport, ALLOC_WAIT_TICK_MS, CONFIG_ACCESS_MODE_BIT, CONFIG_IRQ_RDY_ENABLE,
    CONT_NEXT_LEN_MASK, CTRL_TRAILER_SIZE, DEFAULT_REQUEST_TIMEOUT_MS, EVENT_WAIT_TICK_MS,
    Result,
};
use pool::{Buffer, BufferKind, PoolSet, TxCredit};
use spin::Mutex;

use crate::context::{status_flags, DeviceContext};
use crate::dispatch::{dispatch, IndicationHandler};
use crate::hif::{self, ind_id, msg_id, Interface, MSG_ID_MASK};
use crate::wfm;

/// 总线锁保护的内部状态
pub(crate) struct Inner<T: Transport> {
    pub(crate) bus: RegisterBus<T>,
    pub(crate) pools: PoolSet,
    pub(crate) credit: TxCredit,
    pub(crate) event: EventSlot,
    pub(crate) ctx: DeviceContext,
}

/// 无线协处理器设备句柄
pub struct WifiDevice<T: Transport, H: HostOps> {
    pub(crate) host: H,
    pub(crate) inner: Mutex<Inner<T>>,
    pub(crate) handler: Arc<dyn IndicationHandler>,
}

impl<T: Transport, H: HostOps> WifiDevice<T, H> {
    pub fn new(transport: T, host: H, handler: Arc<dyn IndicationHandler>) -> Self {
        Self {
            host,
            inner: Mutex::new(Inner {
                bus: RegisterBus::new(transport),
                pools: PoolSet::new(),
                credit: TxCredit::new(),
                event: EventSlot::new(),
                ctx: DeviceContext::new(),
            }),
            handler,
        }
    }

    /// 启动设备：复位 → 总线/芯片初始化 → bootloader → 固件下载 →
    /// 开中断 → 切消息模式 → 等启动指示 → 置唤醒脚。
    /// 失败不改动任何状态标志，重试始终安全
    pub fn start<F: FirmwareSource>(&self, firmware: &mut F) -> Result<()> {
        self.host.reset_chip();

        let staged = (|| {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.bus.init()?;
            fw_load::init_chip(&mut inner.bus, &self.host)?;
            fw_load::run_bootloader(&mut inner.bus, &self.host)?;

            // 启动指示在固件跳转后随时可能到达，先布好等待
            inner.event.arm(ind_id::STARTUP & MSG_ID_MASK)?;

            if let Err(e) = fw_load::download(&mut inner.bus, &self.host, firmware) {
                inner.event.disarm();
                return Err(e);
            }

            // 开中断并把设备切到消息访问模式
            self.host.enable_interrupt();
            let config = inner.bus.read_32(Register::Config)?;
            inner.bus.write_32(Register::Config, config | CONFIG_IRQ_RDY_ENABLE)?;
            let config = inner.bus.read_32(Register::Config)?;
            inner
                .bus
                .write_32(Register::Config, config & !CONFIG_ACCESS_MODE_BIT)?;
            Ok(())
        })();
        staged?;

        let payload = self.wait_confirmation(DEFAULT_REQUEST_TIMEOUT_MS)?;
        let boot_status = hif::confirmation_status(payload.data())?;
        if boot_status != hif::status::SUCCESS {
            return Err(Error::DeviceStatus(boot_status));
        }

        self.host.set_wake_up_pin(true);
        log::info!(target: "wireless::fdrv", "device started, mac0={:02x?}", self.mac_address(Interface::Station));
        Ok(())
    }

    /// 状态标志快照（锁外读者按最终一致理解）
    pub fn status(&self) -> u8 {
        self.inner.lock().ctx.status()
    }

    pub fn is_started(&self) -> bool {
        self.status() & status_flags::STARTED != 0
    }

    /// 指定接口的 MAC（启动指示后有效）
    pub fn mac_address(&self, interface: Interface) -> [u8; wfm::MAC_SIZE] {
        let idx = match interface {
            Interface::Station => 0,
            Interface::SoftAp => 1,
        };
        self.inner.lock().ctx.mac_addr[idx]
    }

    /// 发送信用是否允许再发一帧
    pub fn can_send(&self) -> bool {
        self.inner.lock().credit.can_send()
    }

    /// 在途发送帧数
    pub fn used_buffers(&self) -> u16 {
        self.inner.lock().credit.used()
    }

    /// 中断工作线程入口：持总线锁排空设备输出队列
    pub fn process_interrupt(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        Self::drain_locked(inner, &*self.handler)
    }

    /// 接收环（仅在总线锁内运行，也是接收帧缓冲唯一的分配点）。
    /// 读控制寄存器取待收长度；非零则收一帧、派发、以帧尾 trailer
    /// 续读，直到长度为零。坏帧记录日志后丢弃，不阻塞后续帧
    fn drain_locked(inner: &mut Inner<T>, handler: &dyn IndicationHandler) -> Result<()> {
        let mut ctrl: u16 = 0;
        loop {
            let mut len_words = (ctrl & CONT_NEXT_LEN_MASK) as usize;
            if len_words == 0 {
                ctrl = inner.bus.read_16(Register::Control)?;
                len_words = (ctrl & CONT_NEXT_LEN_MASK) as usize;
                if len_words == 0 {
                    return Ok(());
                }
            }

            let frame_len = len_words * 2;
            let read_len = frame_len + CTRL_TRAILER_SIZE;
            let mut buffer = match inner.pools.try_allocate(BufferKind::RxFrame, read_len)? {
                Some(b) => b,
                None => {
                    log::warn!(target: "wireless::fdrv::rx", "rx pool exhausted, {} bytes pending", read_len);
                    return Err(Error::OutOfBuffers);
                }
            };

            match inner.bus.read_queue(buffer.block_mut(), read_len) {
                Ok(piggyback) => {
                    buffer.set_len(read_len);
                    let frame = &buffer.data()[..frame_len];
                    if let Err(e) =
                        dispatch(&mut inner.ctx, &mut inner.event, &mut inner.credit, handler, frame)
                    {
                        log::warn!(target: "wireless::fdrv::rx", "dropping bad frame: {:?}", e);
                    }
                    inner.pools.free(buffer)?;
                    ctrl = piggyback;
                }
                Err(e) => {
                    inner.pools.free(buffer)?;
                    return Err(e);
                }
            }
        }
    }

    /// 等待已 arm 的确认/指示：排空 → 检查匹配 → 锁外睡一个节拍，
    /// 直到超时。超时撤销等待后返回 `Timeout`
    pub fn wait_confirmation(&self, timeout_ms: u32) -> Result<EventPayload> {
        let mut waited = 0u32;
        loop {
            {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;
                if let Err(e) = Self::drain_locked(inner, &*self.handler) {
                    inner.event.disarm();
                    return Err(e);
                }
                if let Some(payload) = inner.event.take_matched() {
                    return Ok(payload);
                }
            }
            if waited >= timeout_ms {
                let mut guard = self.inner.lock();
                log::warn!(target: "wireless::fdrv", "confirmation wait 0x{:02x?} timed out after {}ms", guard.event.waited(), timeout_ms);
                guard.event.disarm();
                return Err(Error::Timeout);
            }
            self.host.wait_ms(EVENT_WAIT_TICK_MS);
            waited += EVENT_WAIT_TICK_MS;
        }
    }

    /// 阻塞分配：池空时锁外让出一个节拍再试，直到超时
    fn allocate_blocking(&self, kind: BufferKind, size: usize, timeout_ms: u32) -> Result<Buffer> {
        let mut waited = 0u32;
        loop {
            if let Some(buffer) = self.inner.lock().pools.try_allocate(kind, size)? {
                return Ok(buffer);
            }
            if waited >= timeout_ms {
                return Err(Error::Timeout);
            }
            self.host.wait_ms(ALLOC_WAIT_TICK_MS);
            waited += ALLOC_WAIT_TICK_MS;
        }
    }

    /// 同步命令骨架：建请求 → arm 确认等待 → 写队列 → 锁外等待。
    /// 回滚保护请求的确认号与请求号不同，在此换算。
    /// 缓冲在任何出口都恰好归还一次
    pub(crate) fn send_command(
        &self,
        id: u8,
        interface: Interface,
        payload: &[u8],
        timeout_ms: u32,
    ) -> Result<EventPayload> {
        let cnf_id = if id == msg_id::PREVENT_ROLLBACK {
            msg_id::PREVENT_ROLLBACK_CNF
        } else {
            id
        };
        let total = hif::round_up_even(hif::HEADER_SIZE + payload.len());
        let mut buffer = self.allocate_blocking(BufferKind::Control, total, timeout_ms)?;

        let staged = (|| {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let seq = inner.ctx.next_seq();
            let len = hif::build_request(buffer.block_mut(), id, interface, seq, payload)?;
            buffer.set_len(len);
            inner.event.arm(cnf_id)?;
            if let Err(e) = inner.bus.write_queue(buffer.block(), len) {
                inner.event.disarm();
                return Err(e);
            }
            Ok(())
        })();
        self.inner.lock().pools.free(buffer)?;
        staged?;

        self.wait_confirmation(timeout_ms)
    }

    /// 同步命令 + 状态码检查（确认体首 4 字节非零即设备侧失败）
    pub(crate) fn send_command_checked(
        &self,
        id: u8,
        interface: Interface,
        payload: &[u8],
    ) -> Result<()> {
        let reply = self.send_command(id, interface, payload, DEFAULT_REQUEST_TIMEOUT_MS)?;
        let code = hif::confirmation_status(reply.data())?;
        if code != hif::status::SUCCESS {
            return Err(Error::DeviceStatus(code));
        }
        Ok(())
    }

    /// 发送一条以太帧。信用不足时给出显式错误；成功占用一份信用，
    /// 对应的发送确认在接收路径归还。不等待确认
    pub fn send_ethernet_frame(
        &self,
        frame: &[u8],
        interface: Interface,
        priority: u8,
    ) -> Result<()> {
        let body_len = wfm::SEND_FRAME_REQ_FIXED + frame.len();
        let total = hif::round_up_even(hif::HEADER_SIZE + body_len);
        let mut buffer = self.allocate_blocking(BufferKind::TxFrame, total, DEFAULT_REQUEST_TIMEOUT_MS)?;

        let staged = (|| {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if !inner.ctx.has_flag(status_flags::STARTED) {
                return Err(Error::NotStarted);
            }
            inner.credit.take()?;

            let packet_id = inner.ctx.next_packet_id();
            let seq = inner.ctx.next_seq();
            let block = buffer.block_mut();
            let n = wfm::build_send_frame_req(&mut block[hif::HEADER_SIZE..], priority, packet_id, frame);
            let total = hif::round_up_even(hif::HEADER_SIZE + n);
            hif::encode_header(block, total as u16, msg_id::SEND_FRAME, interface, seq);
            if total > hif::HEADER_SIZE + n {
                block[total - 1] = 0;
            }
            buffer.set_len(total);

            if let Err(e) = inner.bus.write_queue(buffer.block(), total) {
                // 发送未达设备，信用当场退还
                inner.credit.release();
                return Err(e);
            }
            Ok(())
        })();
        self.inner.lock().pools.free(buffer)?;
        staged
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;
    use axerrno::AxError;
    use core::sync::atomic::{AtomicU32, Ordering};

    /// 脚本化传输：待收帧队列 + 写出记录。控制寄存器与收包 trailer
    /// 都按队首帧长度自动给出
    pub struct ScriptedTransport {
        pub pending: VecDeque<Vec<u8>>,
        pub written: Vec<Vec<u8>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self {
                pending: VecDeque::new(),
                written: Vec::new(),
            }
        }

        pub fn queue_frame(&mut self, frame: Vec<u8>) {
            assert!(frame.len() % 2 == 0);
            self.pending.push_back(frame);
        }

        fn next_ctrl(&self) -> u16 {
            self.pending.front().map(|f| (f.len() / 2) as u16).unwrap_or(0)
        }
    }

    impl Transport for ScriptedTransport {
        fn read(&mut self, addr: u32, buf: &mut [u8]) -> core::result::Result<(), AxError> {
            let reg = (addr >> 2) & 0x1F;
            buf.fill(0);
            if reg == Register::Control as u32 {
                buf[..2].copy_from_slice(&self.next_ctrl().to_le_bytes());
            } else if reg == Register::InOutQueue as u32 {
                let frame = self.pending.pop_front().unwrap_or_default();
                buf[..frame.len()].copy_from_slice(&frame);
                let trailer = self.next_ctrl().to_le_bytes();
                buf[frame.len()..frame.len() + 2].copy_from_slice(&trailer);
            } else if reg == Register::Config as u32 {
                buf[..4].copy_from_slice(&0x0400u32.to_le_bytes());
            }
            Ok(())
        }

        fn write(&mut self, addr: u32, buf: &[u8]) -> core::result::Result<(), AxError> {
            let reg = (addr >> 2) & 0x1F;
            if reg == Register::InOutQueue as u32 {
                self.written.push(buf.to_vec());
            }
            Ok(())
        }
    }

    /// 计时宿主：累计 wait_ms 便于断言阻塞行为
    pub struct FakeHost {
        pub waited_ms: AtomicU32,
    }

    impl FakeHost {
        pub fn new() -> Self {
            Self {
                waited_ms: AtomicU32::new(0),
            }
        }
    }

    impl HostOps for FakeHost {
        fn reset_chip(&self) {}
        fn set_wake_up_pin(&self, _state: bool) {}
        fn wait_ms(&self, ms: u32) {
            self.waited_ms.fetch_add(ms, Ordering::Relaxed);
        }
        fn enable_interrupt(&self) {}
        fn disable_interrupt(&self) {}
    }

    /// 组一条完整消息（头 + 体，长度取偶）
    pub fn frame(id: u8, interface: u8, body: &[u8]) -> Vec<u8> {
        let total = hif::round_up_even(hif::HEADER_SIZE + body.len());
        let mut f = alloc::vec![0u8; total];
        f[..2].copy_from_slice(&(total as u16).to_le_bytes());
        f[2] = id;
        f[3] = interface;
        f[hif::HEADER_SIZE..hif::HEADER_SIZE + body.len()].copy_from_slice(body);
        f
    }

    /// 组一条启动指示
    pub fn startup_frame(num_bufs: u16) -> Vec<u8> {
        let mut body = alloc::vec![0u8; 46];
        body[28..30].copy_from_slice(&num_bufs.to_le_bytes());
        body[30..32].copy_from_slice(&1616u16.to_le_bytes());
        body[34..40].copy_from_slice(&[0x02, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E]);
        body[40..46].copy_from_slice(&[0x02, 0x0A, 0x0B, 0x0C, 0x0D, 0x0F]);
        frame(ind_id::STARTUP, 0, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::dispatch::NullHandler;
    use core::sync::atomic::Ordering;

    fn device() -> WifiDevice<ScriptedTransport, FakeHost> {
        WifiDevice::new(ScriptedTransport::new(), FakeHost::new(), Arc::new(NullHandler))
    }

    fn boot(dev: &WifiDevice<ScriptedTransport, FakeHost>, num_bufs: u16) {
        dev.inner
            .lock()
            .bus
            .transport_mut()
            .queue_frame(startup_frame(num_bufs));
        dev.process_interrupt().unwrap();
        assert!(dev.is_started());
    }

    #[test]
    fn startup_indication_records_macs_and_credit() {
        let dev = device();
        boot(&dev, 8);
        assert_eq!(dev.mac_address(Interface::Station)[5], 0x0E);
        assert_eq!(dev.mac_address(Interface::SoftAp)[5], 0x0F);
        // 上限 = 通告值 - 1
        assert_eq!(dev.inner.lock().credit.limit(), 7);
    }

    #[test]
    fn credit_round_trip_over_send_and_confirmation() {
        let dev = device();
        boot(&dev, 4);
        assert_eq!(dev.used_buffers(), 0);

        dev.send_ethernet_frame(&[0xEE; 60], Interface::Station, 0).unwrap();
        assert_eq!(dev.used_buffers(), 1);
        // 写出的是 SEND_FRAME 请求
        let written = dev.inner.lock().bus.transport_ref().written.last().unwrap().clone();
        let header = hif::parse_header(&written).unwrap();
        assert_eq!(header.id, msg_id::SEND_FRAME);

        // 发送确认让信用归位
        let mut cnf_body = [0u8; 8];
        cnf_body[..4].copy_from_slice(&hif::status::SUCCESS.to_le_bytes());
        cnf_body[4..6].copy_from_slice(&1u16.to_le_bytes());
        let cnf = frame(msg_id::SEND_FRAME, 0, &cnf_body);
        dev.inner.lock().bus.transport_mut().queue_frame(cnf);
        dev.process_interrupt().unwrap();
        assert_eq!(dev.used_buffers(), 0);
    }

    #[test]
    fn credit_exhaustion_is_explicit_error() {
        let dev = device();
        boot(&dev, 2); // 上限 1
        dev.send_ethernet_frame(&[0; 60], Interface::Station, 0).unwrap();
        assert_eq!(
            dev.send_ethernet_frame(&[0; 60], Interface::Station, 0),
            Err(Error::WouldExceedDeviceQueue)
        );
        assert!(!dev.can_send());
    }

    #[test]
    fn send_before_startup_rejected() {
        let dev = device();
        assert_eq!(
            dev.send_ethernet_frame(&[0; 60], Interface::Station, 0),
            Err(Error::NotStarted)
        );
    }

    #[test]
    fn wait_matches_indication_for_armed_request_id() {
        // arm 0x43（连接确认号），注入 0xC3（连接指示）：等待须以指示负载返回，
        // 且站点连接标志在解除等待前已置位
        let dev = device();
        boot(&dev, 4);

        dev.inner.lock().event.arm(msg_id::CONNECT).unwrap();
        let mut body = [0u8; 16];
        body[..4].copy_from_slice(&0u32.to_le_bytes());
        let ind = frame(ind_id::CONNECT, 0, &body);
        dev.inner.lock().bus.transport_mut().queue_frame(ind.clone());

        let payload = dev.wait_confirmation(10).unwrap();
        assert_eq!(payload.data(), &ind[..]);
        assert!(dev.status() & status_flags::STA_CONNECTED != 0);
    }

    #[test]
    fn wait_times_out_and_disarms() {
        let dev = device();
        dev.inner.lock().event.arm(msg_id::DISCONNECT).unwrap();
        assert_eq!(dev.wait_confirmation(5), Err(Error::Timeout));
        assert_eq!(dev.host.waited_ms.load(Ordering::Relaxed), 5);
        // 超时后等待槽已清空，可再次 arm
        dev.inner.lock().event.arm(msg_id::DISCONNECT).unwrap();
    }

    #[test]
    fn drain_handles_chained_frames_via_trailer() {
        let dev = device();
        let f1 = frame(ind_id::SCAN_COMPLETE, 0, &0u32.to_le_bytes());
        let f2 = startup_frame(4);
        {
            let mut guard = dev.inner.lock();
            let t = guard.bus.transport_mut();
            t.queue_frame(f1);
            t.queue_frame(f2);
        }
        dev.process_interrupt().unwrap();
        // 两帧都已派发（第二帧触发启动记账），且接收池无泄漏
        assert!(dev.is_started());
        assert_eq!(dev.inner.lock().pools.available(pool::BufferKind::RxFrame), 8);
    }
}
