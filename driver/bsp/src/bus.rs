//! 总线寄存器层
//!
//! 把平台注入的裸传输原语变成带类型的寄存器操作：
//! - 16/32 位寄存器读写（小端，4 字节传输）
//! - 帧队列读写：buffer id 旋转折叠进地址，设备据此流水多帧
//! - 窗口化间接访问：基址寄存器 + 数据口，读方向带预取位轮询
//! - 块总线超阈值按块补齐，收包补齐后搬移末 2 字节流控 trailer
//!
//! 本层不重试（预取位的有界轮询除外），传输故障一律以
//! `Error::Transport` 上抛。

use alloc::vec;
use axerrno::AxError;

use crate::config::{PREFETCH_POLL_RETRIES, REGISTER_POLL_TICK_MS};
use crate::error::{Error, ProtocolViolation, Result};

/// 物理总线传输接口（平台实现）
///
/// `addr` 为折叠后的传输地址（buffer id 与寄存器号已编码在内），
/// 本 trait 不关心其含义。块总线（如卡总线）返回真实块大小，
/// 字节流总线（如串行外设总线）返回 1。
pub trait Transport {
    /// 从 `addr` 读满 `buf`
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> core::result::Result<(), AxError>;
    /// 把 `buf` 全部写到 `addr`
    fn write(&mut self, addr: u32, buf: &[u8]) -> core::result::Result<(), AxError>;
    /// 传输块大小：1 = 字节流（无补齐），>1 = 块模式（超阈值按块补齐）
    fn block_size(&self) -> usize {
        1
    }
    /// 总线初始化（使能 function、协商块大小等）
    fn init(&mut self) -> core::result::Result<(), AxError> {
        Ok(())
    }
    fn deinit(&mut self) -> core::result::Result<(), AxError> {
        Ok(())
    }
    /// 片选线控制（带选择线的串行总线用，其余总线保持空操作）
    fn assert_select(&mut self) {}
    fn deassert_select(&mut self) {}
    /// 切换高速时钟（可选协商）
    fn enable_high_speed(&mut self) -> core::result::Result<(), AxError> {
        Ok(())
    }
}

/// 平台原语（GPIO、延时、中断开关），由宿主实现
pub trait HostOps {
    /// 复位设备（拉低再拉高复位脚）
    fn reset_chip(&self);
    /// 设置唤醒脚电平
    fn set_wake_up_pin(&self, state: bool);
    /// 毫秒级延时/让出
    fn wait_ms(&self, ms: u32);
    /// 使能设备数据中断
    fn enable_interrupt(&self);
    fn disable_interrupt(&self);
}

/// 寄存器号（折叠进传输地址的低位）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Register {
    Config = 0,
    Control = 1,
    InOutQueue = 2,
    AhbDport = 3,
    SramBaseAddr = 4,
    SramDport = 5,
    TsetGenRw = 6,
    FrameOut = 7,
}

// CONTROL 寄存器位
/// 下一帧长度字段（单位：16 位字）
pub const CONT_NEXT_LEN_MASK: u16 = 0x0FFF;
pub const CONT_WUP_BIT: u16 = 1 << 12;
pub const CONT_RDY_BIT: u16 = 1 << 13;

// CONFIG 寄存器位
pub const CONFIG_ACCESS_MODE_BIT: u32 = 1 << 10;
pub const CONFIG_CPU_CLK_DIS_BIT: u32 = 1 << 12;
pub const CONFIG_PREFETCH_BIT: u32 = 1 << 13;
pub const CONFIG_CPU_RESET_BIT: u32 = 1 << 14;
pub const CONFIG_IRQ_RDY_ENABLE: u32 = (1 << 16) | (1 << 17);

/// 块模式补齐阈值：传输长度达到该值才按块补齐
pub const BLOCK_MODE_THRESHOLD: usize = 512;
/// 收包末尾搭载的控制寄存器 trailer 长度
pub const CTRL_TRAILER_SIZE: usize = 2;

/// 队列读 buffer id 取 1..=4 回绕，写取 0..=31 回绕
const RX_BUFFER_ID_MAX: u32 = 4;
const TX_BUFFER_ID_MAX: u32 = 31;

/// 间接写单次长度上限（窗口化访问的硬限制，单位 16 位字）
const INDIRECT_MAX_HALFWORDS: usize = 0x1000;

enum QueueDir {
    Read,
    Write,
}

/// 带类型的寄存器总线。调用方负责串行化（单一总线锁）
pub struct RegisterBus<T: Transport> {
    transport: T,
    rx_buffer_id: u32,
    tx_buffer_id: u32,
}

impl<T: Transport> RegisterBus<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            rx_buffer_id: 1,
            tx_buffer_id: 0,
        }
    }

    /// 初始化总线并验证设备可达：buffer id 复位，CONFIG 全 0/全 1 视为总线不通
    pub fn init(&mut self) -> Result<()> {
        self.rx_buffer_id = 1;
        self.tx_buffer_id = 0;
        self.transport.init().map_err(Error::Transport)?;
        let value = self.read_32(Register::Config)?;
        if value == 0 || value == 0xFFFF_FFFF {
            log::warn!(target: "wireless::bsp::bus", "bus init: CONFIG=0x{:08x}, device unreachable", value);
            return Err(Error::Transport(AxError::Io));
        }
        log::debug!(target: "wireless::bsp::bus", "bus init ok, CONFIG=0x{:08x}", value);
        Ok(())
    }

    pub fn deinit(&mut self) -> Result<()> {
        self.transport.deinit().map_err(Error::Transport)
    }

    pub fn block_size(&self) -> usize {
        self.transport.block_size()
    }

    pub fn transport_ref(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// 折叠传输地址：(buffer_id << 7) | (寄存器号 << 2)。
    /// 仅帧队列寄存器携带旋转 id，其余寄存器 id 恒 0
    fn fold_address(&mut self, reg: Register, dir: QueueDir) -> u32 {
        let buffer_id = if matches!(reg, Register::InOutQueue) {
            match dir {
                QueueDir::Read => {
                    let id = self.rx_buffer_id;
                    self.rx_buffer_id += 1;
                    if self.rx_buffer_id > RX_BUFFER_ID_MAX {
                        self.rx_buffer_id = 1;
                    }
                    id
                }
                QueueDir::Write => {
                    let id = self.tx_buffer_id;
                    self.tx_buffer_id += 1;
                    if self.tx_buffer_id > TX_BUFFER_ID_MAX {
                        self.tx_buffer_id = 0;
                    }
                    id
                }
            }
        } else {
            0
        };
        (buffer_id << 7) | ((reg as u32) << 2)
    }

    /// 块总线上长度达到阈值则补齐到块边界，否则原样
    fn padded_len(&self, len: usize) -> usize {
        let bs = self.transport.block_size();
        if bs > 1 && len >= BLOCK_MODE_THRESHOLD {
            len.div_ceil(bs) * bs
        } else {
            len
        }
    }

    fn reg_read(&mut self, reg: Register, buf: &mut [u8]) -> Result<()> {
        let addr = self.fold_address(reg, QueueDir::Read);
        self.transport.read(addr, buf).map_err(Error::Transport)
    }

    /// 普通寄存器写。补齐超过 `buf` 时经由临时缓冲补零后传输
    fn reg_write(&mut self, reg: Register, buf: &[u8]) -> Result<()> {
        let addr = self.fold_address(reg, QueueDir::Write);
        let transfer_len = self.padded_len(buf.len());
        if transfer_len > buf.len() {
            let mut padded = vec![0u8; transfer_len];
            padded[..buf.len()].copy_from_slice(buf);
            self.transport.write(addr, &padded).map_err(Error::Transport)
        } else {
            self.transport.write(addr, buf).map_err(Error::Transport)
        }
    }

    pub fn read_16(&mut self, reg: Register) -> Result<u16> {
        let mut tmp = [0u8; 4];
        self.reg_read(reg, &mut tmp)?;
        Ok(u16::from_le_bytes([tmp[0], tmp[1]]))
    }

    pub fn write_16(&mut self, reg: Register, value: u16) -> Result<()> {
        let mut tmp = [0u8; 4];
        tmp[..2].copy_from_slice(&value.to_le_bytes());
        self.reg_write(reg, &tmp)
    }

    pub fn read_32(&mut self, reg: Register) -> Result<u32> {
        let mut tmp = [0u8; 4];
        self.reg_read(reg, &mut tmp)?;
        Ok(u32::from_le_bytes(tmp))
    }

    pub fn write_32(&mut self, reg: Register, value: u32) -> Result<()> {
        self.reg_write(reg, &value.to_le_bytes())
    }

    /// 从帧队列读 `len` 字节（含末 2 字节流控 trailer），返回 trailer 中的控制值。
    ///
    /// 块补齐时设备把 trailer 放在补齐传输的末尾，需搬回 `len - 2` 处；
    /// 搬移后 trailer 的下一帧长度为 0 时追加一次 CONFIG 哑读向设备确认本帧
    /// （设备侧既定行为，缺了这次哑读设备不会推进输出队列）。
    ///
    /// `buf` 容量必须覆盖补齐后的传输长度。
    pub fn read_queue(&mut self, buf: &mut [u8], len: usize) -> Result<u16> {
        debug_assert!(len >= CTRL_TRAILER_SIZE);
        let transfer_len = self.padded_len(len);
        if buf.len() < transfer_len {
            return Err(Error::OutOfBuffers);
        }
        let addr = self.fold_address(Register::InOutQueue, QueueDir::Read);
        self.transport
            .read(addr, &mut buf[..transfer_len])
            .map_err(Error::Transport)?;

        if self.transport.block_size() > 1 && len > BLOCK_MODE_THRESHOLD {
            buf[len - 2] = buf[transfer_len - 2];
            buf[len - 1] = buf[transfer_len - 1];
        }
        let piggyback = u16::from_le_bytes([buf[len - 2], buf[len - 1]]);
        if piggyback & CONT_NEXT_LEN_MASK == 0 {
            let _ = self.read_32(Register::Config)?;
        }
        Ok(piggyback)
    }

    /// 向帧队列写 `len` 字节。块补齐时直接放大传输长度，
    /// 因此 `buf` 容量必须覆盖补齐后的长度（池块按此预留）
    pub fn write_queue(&mut self, buf: &[u8], len: usize) -> Result<()> {
        let transfer_len = self.padded_len(len);
        if buf.len() < transfer_len {
            return Err(Error::OutOfBuffers);
        }
        let addr = self.fold_address(Register::InOutQueue, QueueDir::Write);
        self.transport
            .write(addr, &buf[..transfer_len])
            .map_err(Error::Transport)
    }

    /// 窗口化间接写：写目标地址到基址寄存器，经数据口流式写出
    pub fn indirect_write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if data.len() / 2 >= INDIRECT_MAX_HALFWORDS {
            return Err(Error::Protocol(ProtocolViolation::IndirectLengthTooLarge));
        }
        self.write_32(Register::SramBaseAddr, address)?;
        self.reg_write(Register::SramDport, data)
    }

    pub fn indirect_write_32(&mut self, address: u32, value: u32) -> Result<()> {
        self.write_32(Register::SramBaseAddr, address)?;
        self.write_32(Register::SramDport, value)
    }

    /// 窗口化间接读：置预取位后有界轮询其清零，再读数据口。
    /// 轮询预算用尽返回 `Timeout`，绝不把陈旧数据当结果
    pub fn indirect_read_32(&mut self, host: &dyn HostOps, address: u32) -> Result<u32> {
        self.write_32(Register::SramBaseAddr, address)?;
        let config = self.read_32(Register::Config)?;
        self.write_32(Register::Config, config | CONFIG_PREFETCH_BIT)?;

        let mut cleared = false;
        for _ in 0..PREFETCH_POLL_RETRIES {
            if self.read_32(Register::Config)? & CONFIG_PREFETCH_BIT == 0 {
                cleared = true;
                break;
            }
            host.wait_ms(REGISTER_POLL_TICK_MS);
        }
        if !cleared {
            log::warn!(target: "wireless::bsp::bus", "indirect read 0x{:08x}: prefetch bit stuck", address);
            return Err(Error::Timeout);
        }
        self.read_32(Register::SramDport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// 记录每次传输折叠地址的假总线
    struct RecordingTransport {
        addrs: Vec<u32>,
        block_size: usize,
        read_data: Vec<u8>,
    }

    impl RecordingTransport {
        fn new(block_size: usize) -> Self {
            Self {
                addrs: Vec::new(),
                block_size,
                read_data: Vec::new(),
            }
        }
    }

    impl Transport for RecordingTransport {
        fn read(&mut self, addr: u32, buf: &mut [u8]) -> core::result::Result<(), AxError> {
            self.addrs.push(addr);
            for (i, b) in buf.iter_mut().enumerate() {
                *b = *self.read_data.get(i).unwrap_or(&0);
            }
            Ok(())
        }
        fn write(&mut self, addr: u32, _buf: &[u8]) -> core::result::Result<(), AxError> {
            self.addrs.push(addr);
            Ok(())
        }
        fn block_size(&self) -> usize {
            self.block_size
        }
    }

    #[test]
    fn queue_read_ids_wrap_1_to_4() {
        let mut bus = RegisterBus::new(RecordingTransport::new(1));
        // trailer 非零，避免哑读混入地址记录
        bus.transport.read_data = vec![0u8; 8];
        bus.transport.read_data[4] = 0x01;
        let mut buf = [0u8; 8];
        for _ in 0..6 {
            bus.read_queue(&mut buf, 6).unwrap();
        }
        let ids: Vec<u32> = bus.transport.addrs.iter().map(|a| a >> 7).collect();
        assert_eq!(ids, [1, 2, 3, 4, 1, 2]);
        // 寄存器号折叠在 bit2..7
        assert!(bus
            .transport
            .addrs
            .iter()
            .all(|a| (a >> 2) & 0x1F == Register::InOutQueue as u32));
    }

    #[test]
    fn queue_write_ids_wrap_0_to_31() {
        let mut bus = RegisterBus::new(RecordingTransport::new(1));
        let buf = [0u8; 4];
        for _ in 0..33 {
            bus.write_queue(&buf, 4).unwrap();
        }
        let ids: Vec<u32> = bus.transport.addrs.iter().map(|a| a >> 7).collect();
        assert_eq!(ids[0], 0);
        assert_eq!(ids[31], 31);
        assert_eq!(ids[32], 0);
    }

    #[test]
    fn unpadded_read_keeps_trailer_at_logical_end() {
        // 长度 100 < 阈值 512：不补齐，trailer 就位于 98..100
        let mut transport = RecordingTransport::new(512);
        transport.read_data = vec![0u8; 100];
        transport.read_data[98] = 0x34;
        transport.read_data[99] = 0x02;
        let mut bus = RegisterBus::new(transport);
        let mut buf = [0u8; 100];
        let ctrl = bus.read_queue(&mut buf, 100).unwrap();
        assert_eq!(ctrl, 0x0234);
        assert_eq!(u16::from_le_bytes([buf[98], buf[99]]), 0x0234);
        // 无哑读：只有一次队列传输
        assert_eq!(bus.transport.addrs.len(), 1);
    }

    #[test]
    fn padded_read_moves_trailer_and_acks_zero() {
        // 长度 600 > 阈值：补齐到 1024，真 trailer 在 1022..1024，且为 0 → 触发哑读
        let mut transport = RecordingTransport::new(512);
        transport.read_data = vec![0u8; 1024];
        transport.read_data[598] = 0xAA; // 补齐前末尾的残数据，搬移后必须被覆盖
        transport.read_data[599] = 0xAA;
        let mut bus = RegisterBus::new(transport);
        let mut buf = [0u8; 1024];
        let ctrl = bus.read_queue(&mut buf, 600).unwrap();
        assert_eq!(ctrl, 0);
        assert_eq!(buf[598], 0);
        assert_eq!(buf[599], 0);
        // 队列读 + 哑读 CONFIG
        assert_eq!(bus.transport.addrs.len(), 2);
        assert_eq!(bus.transport.addrs[1], (Register::Config as u32) << 2);
    }

    struct StuckPrefetch;
    impl Transport for StuckPrefetch {
        fn read(&mut self, _addr: u32, buf: &mut [u8]) -> core::result::Result<(), AxError> {
            // CONFIG 读恒返回预取位置位
            buf.copy_from_slice(&CONFIG_PREFETCH_BIT.to_le_bytes());
            Ok(())
        }
        fn write(&mut self, _addr: u32, _buf: &[u8]) -> core::result::Result<(), AxError> {
            Ok(())
        }
    }

    struct NoopHost;
    impl HostOps for NoopHost {
        fn reset_chip(&self) {}
        fn set_wake_up_pin(&self, _state: bool) {}
        fn wait_ms(&self, _ms: u32) {}
        fn enable_interrupt(&self) {}
        fn disable_interrupt(&self) {}
    }

    #[test]
    fn indirect_read_times_out_when_prefetch_never_clears() {
        let mut bus = RegisterBus::new(StuckPrefetch);
        assert_eq!(bus.indirect_read_32(&NoopHost, 0x0900_C000), Err(Error::Timeout));
    }
}
