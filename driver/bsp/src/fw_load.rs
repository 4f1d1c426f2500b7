//! 芯片引导与固件下载
//!
//! 三个阶段，全部经由窗口化间接访问操作设备共享内存：
//! 1. `init_chip`：通用寄存器初始化序列、置 WUP 位并等 RDY、校验队列访问模式位
//! 2. `run_bootloader`：释放片上 CPU 复位与时钟门控，SRAM 探测写回读
//! 3. `download`：与 bootloader 的哨兵值握手，把签名固件经 put/get 流控环推入设备
//!
//! 下载控制区的偏移与哨兵值是与设备 bootloader 的逐位契约，不可改动。

use core::cmp::min;

use crate::bus::{
    HostOps, Register, RegisterBus, Transport, CONFIG_ACCESS_MODE_BIT, CONFIG_CPU_CLK_DIS_BIT,
    CONFIG_CPU_RESET_BIT, CONT_RDY_BIT, CONT_WUP_BIT,
};
use crate::config::{DOWNLOAD_POLL_RETRIES, REGISTER_POLL_TICK_MS, WAKEUP_POLL_RETRIES};
use crate::error::{Error, ProtocolViolation, Result};

// ============================================================================
// 下载控制区布局（设备共享内存）
// ============================================================================

pub const ADDR_DWL_CTRL_AREA: u32 = 0x0900_C000;
pub const ADDR_DWL_CTRL_AREA_IMAGE_SIZE: u32 = ADDR_DWL_CTRL_AREA;
pub const ADDR_DWL_CTRL_AREA_PUT: u32 = ADDR_DWL_CTRL_AREA + 4;
pub const ADDR_DWL_CTRL_AREA_GET: u32 = ADDR_DWL_CTRL_AREA + 8;
pub const ADDR_DWL_CTRL_AREA_HOST_STATUS: u32 = ADDR_DWL_CTRL_AREA + 12;
pub const ADDR_DWL_CTRL_AREA_NCP_STATUS: u32 = ADDR_DWL_CTRL_AREA + 16;
pub const ADDR_DWL_CTRL_AREA_SIGNATURE: u32 = ADDR_DWL_CTRL_AREA + 20;
pub const ADDR_DWL_CTRL_AREA_FW_HASH: u32 =
    ADDR_DWL_CTRL_AREA_SIGNATURE + FW_SIGNATURE_SIZE as u32;
pub const ADDR_DWL_CTRL_AREA_FW_VERSION: u32 = ADDR_DWL_CTRL_AREA_FW_HASH + FW_HASH_SIZE as u32;

/// 下载环：共享内存中的固定环形缓冲
pub const ADDR_DOWNLOAD_FIFO_BASE: u32 = 0x0900_4000;
pub const DOWNLOAD_FIFO_SIZE: u32 = 0x8000;
pub const DOWNLOAD_BLOCK_SIZE: u32 = 1024;

/// 镜像前缀：keyset(8) + 签名(64) + 哈希(8)，不计入下载长度
pub const FW_KEYSET_SIZE: usize = 8;
pub const FW_SIGNATURE_SIZE: usize = 64;
pub const FW_HASH_SIZE: usize = 8;
pub const FW_VERSION_VALUE: u32 = 0x0000_0001;

/// 芯片密钥组信息区：+12 处字的 bit8..16 为芯片 keyset 编号
const ADDR_PTE_INFO: u32 = 0x0900_C0C0;
/// 引导信息字（握手 INFO_READY 后读取一次）
const ADDR_BOOT_INFO: u32 = 0x0900_C080;
/// 引导后 SRAM 探测字
const SRAM_PROBE_WORD: u32 = 0x23ab_c88e;

/// 主机状态哨兵值（主机写入 HOST_STATUS）
pub mod host_state {
    pub const NOT_READY: u32 = 0x1234_5678;
    pub const READY: u32 = 0x8765_4321;
    pub const HOST_INFO_READ: u32 = 0xA753_BD99;
    pub const UPLOAD_PENDING: u32 = 0xABCD_DCBA;
    pub const UPLOAD_COMPLETE: u32 = 0xD4C6_4A99;
    pub const OK_TO_JUMP: u32 = 0x174F_C882;
}

/// 设备状态哨兵值（bootloader 写入 NCP_STATUS）
pub mod ncp_state {
    pub const NOT_READY: u32 = 0x1234_5678;
    pub const INFO_READY: u32 = 0xBD53_EF99;
    pub const READY: u32 = 0x8765_4321;
    pub const DOWNLOAD_PENDING: u32 = 0xABCD_DCBA;
    pub const DOWNLOAD_COMPLETE: u32 = 0xCAFE_FECA;
    pub const AUTH_OK: u32 = 0xD4C6_4A99;
    pub const AUTH_FAIL: u32 = 0x174F_C882;
}

/// 通用寄存器初始化序列（芯片唤醒前写入）
const CHIP_INIT_WORDS: [u32; 5] = [
    0x0720_8775,
    0x082e_c020,
    0x093c_3c3c,
    0x0b32_2c44,
    0x0ca0_6497,
];

/// 固件镜像来源（平台注入）：游标式按需取块。
/// 依序取 keyset、签名、哈希前缀之后即为镜像本体
pub trait FirmwareSource {
    /// 镜像总长（含前缀）
    fn size(&self) -> u32;
    /// 取接下来的 `len` 字节并推进游标
    fn chunk(&mut self, len: usize) -> &[u8];
}

/// 芯片初始化：写初始化序列、置 WUP 位并有界轮询 RDY 位、校验访问模式
pub fn init_chip<T: Transport>(bus: &mut RegisterBus<T>, host: &dyn HostOps) -> Result<()> {
    let _ = bus.read_32(Register::Config)?;

    for word in CHIP_INIT_WORDS {
        bus.write_32(Register::TsetGenRw, word)?;
    }

    let control = bus.read_16(Register::Control)?;
    bus.write_16(Register::Control, control | CONT_WUP_BIT)?;

    let mut ready = false;
    for _ in 0..WAKEUP_POLL_RETRIES {
        if bus.read_16(Register::Control)? & CONT_RDY_BIT != 0 {
            ready = true;
            break;
        }
        host.wait_ms(REGISTER_POLL_TICK_MS);
    }
    if !ready {
        log::warn!(target: "wireless::bsp::fw", "init_chip: RDY bit never set");
        return Err(Error::Timeout);
    }

    let config = bus.read_32(Register::Config)?;
    if config & CONFIG_ACCESS_MODE_BIT == 0 {
        return Err(Error::Protocol(ProtocolViolation::AccessModeNotSet));
    }
    log::debug!(target: "wireless::bsp::fw", "init_chip ok, CONFIG=0x{:08x}", config);
    Ok(())
}

/// 运行 bootloader：释放 CPU 复位与时钟门控，SRAM 写回读探测
pub fn run_bootloader<T: Transport>(bus: &mut RegisterBus<T>, host: &dyn HostOps) -> Result<()> {
    let _ = bus.indirect_read_32(host, ADDR_DWL_CTRL_AREA_NCP_STATUS)?;

    let config = bus.read_32(Register::Config)?;
    bus.write_32(
        Register::Config,
        config & !(CONFIG_CPU_RESET_BIT | CONFIG_CPU_CLK_DIS_BIT),
    )?;

    bus.indirect_write_32(ADDR_DOWNLOAD_FIFO_BASE, SRAM_PROBE_WORD)?;
    let probe = bus.indirect_read_32(host, ADDR_DOWNLOAD_FIFO_BASE)?;
    if probe != SRAM_PROBE_WORD {
        log::warn!(target: "wireless::bsp::fw", "sram probe: wrote 0x{:08x} read 0x{:08x}", SRAM_PROBE_WORD, probe);
        return Err(Error::Protocol(ProtocolViolation::SramProbeFailed));
    }
    Ok(())
}

/// 有界轮询设备状态字等于期望哨兵值，预算用尽记下载超时
fn poll_ncp_status<T: Transport>(
    bus: &mut RegisterBus<T>,
    host: &dyn HostOps,
    address: u32,
    expected: u32,
) -> Result<()> {
    for _ in 0..DOWNLOAD_POLL_RETRIES {
        if bus.indirect_read_32(host, address)? == expected {
            return Ok(());
        }
        host.wait_ms(REGISTER_POLL_TICK_MS);
    }
    log::warn!(target: "wireless::bsp::fw", "ncp status poll: 0x{:08x} never became 0x{:08x}", address, expected);
    Err(Error::FirmwareDownloadTimeout)
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// keyset 前缀第 6..8 字节为 ASCII 十六进制编号，须与芯片 keyset 一致
fn compare_keysets(chip_keyset: u8, prefix: &[u8; FW_KEYSET_SIZE]) -> Result<()> {
    let hi = hex_digit(prefix[6]).ok_or(Error::FirmwareInvalidKeyset)?;
    let lo = hex_digit(prefix[7]).ok_or(Error::FirmwareInvalidKeyset)?;
    let image_keyset = (hi << 4) | lo;
    if image_keyset != chip_keyset {
        log::warn!(target: "wireless::bsp::fw", "keyset mismatch: image 0x{:02x} chip 0x{:02x}", image_keyset, chip_keyset);
        return Err(Error::FirmwareInvalidKeyset);
    }
    Ok(())
}

/// 固件下载主序列。任何一步失败整体失败，错误类别可区分：
/// 传输故障 / 握手或流控超时 / keyset 不符 / 签名被拒 / 状态字异常
pub fn download<T: Transport, F: FirmwareSource>(
    bus: &mut RegisterBus<T>,
    host: &dyn HostOps,
    firmware: &mut F,
) -> Result<()> {
    // 握手复位：NOT_READY -> 清零游标 -> READY
    bus.indirect_write_32(ADDR_DWL_CTRL_AREA_HOST_STATUS, host_state::NOT_READY)?;
    bus.indirect_write_32(ADDR_DWL_CTRL_AREA_PUT, 0)?;
    bus.indirect_write_32(ADDR_DWL_CTRL_AREA_GET, 0)?;
    bus.indirect_write_32(ADDR_DWL_CTRL_AREA_HOST_STATUS, host_state::READY)?;

    poll_ncp_status(bus, host, ADDR_DWL_CTRL_AREA_NCP_STATUS, ncp_state::INFO_READY)?;

    let _ = bus.indirect_read_32(host, ADDR_BOOT_INFO)?;
    let chip_keyset = (bus.indirect_read_32(host, ADDR_PTE_INFO + 12)? >> 8) as u8;

    bus.indirect_write_32(ADDR_DWL_CTRL_AREA_HOST_STATUS, host_state::HOST_INFO_READ)?;
    poll_ncp_status(bus, host, ADDR_DWL_CTRL_AREA_NCP_STATUS, ncp_state::READY)?;

    // 旧版芯片的安全引导兼容写
    bus.indirect_write_32(ADDR_DOWNLOAD_FIFO_BASE, 0xFFFF_FFFF)?;

    let image_len = firmware.size();
    let prefix_len = (FW_KEYSET_SIZE + FW_SIGNATURE_SIZE + FW_HASH_SIZE) as u32;
    let payload_len = image_len - prefix_len;
    bus.indirect_write_32(ADDR_DWL_CTRL_AREA_IMAGE_SIZE, payload_len)?;

    let mut keyset = [0u8; FW_KEYSET_SIZE];
    keyset.copy_from_slice(firmware.chunk(FW_KEYSET_SIZE));
    compare_keysets(chip_keyset, &keyset)?;

    let mut signature = [0u8; FW_SIGNATURE_SIZE];
    signature.copy_from_slice(firmware.chunk(FW_SIGNATURE_SIZE));
    bus.indirect_write(ADDR_DWL_CTRL_AREA_SIGNATURE, &signature)?;

    let mut hash = [0u8; FW_HASH_SIZE];
    hash.copy_from_slice(firmware.chunk(FW_HASH_SIZE));
    bus.indirect_write(ADDR_DWL_CTRL_AREA_FW_HASH, &hash)?;

    bus.indirect_write_32(ADDR_DWL_CTRL_AREA_FW_VERSION, FW_VERSION_VALUE)?;
    bus.indirect_write_32(ADDR_DWL_CTRL_AREA_HOST_STATUS, host_state::UPLOAD_PENDING)?;

    let num_blocks = (payload_len - 1) / DOWNLOAD_BLOCK_SIZE + 1;
    log::info!(target: "wireless::bsp::fw", "download: {} bytes in {} blocks", payload_len, num_blocks);

    let mut put: u32 = 0;
    for block in 0..num_blocks {
        let ncp = bus.indirect_read_32(host, ADDR_DWL_CTRL_AREA_NCP_STATUS)?;
        if ncp != ncp_state::DOWNLOAD_PENDING {
            return Err(Error::Protocol(ProtocolViolation::UnexpectedNcpStatus(ncp)));
        }

        // 流控：环内未消费数据不得超过 环容量 - 块大小
        let mut window_open = false;
        for _ in 0..DOWNLOAD_POLL_RETRIES {
            let get = bus.indirect_read_32(host, ADDR_DWL_CTRL_AREA_GET)?;
            if put.wrapping_sub(get) <= DOWNLOAD_FIFO_SIZE - DOWNLOAD_BLOCK_SIZE {
                window_open = true;
                break;
            }
            host.wait_ms(REGISTER_POLL_TICK_MS);
        }
        if !window_open {
            return Err(Error::FirmwareDownloadTimeout);
        }

        let block_size = min(payload_len - put, DOWNLOAD_BLOCK_SIZE);
        let chunk = firmware.chunk(block_size as usize);
        bus.indirect_write(ADDR_DOWNLOAD_FIFO_BASE + (put % DOWNLOAD_FIFO_SIZE), chunk)?;
        put += block_size;
        bus.indirect_write_32(ADDR_DWL_CTRL_AREA_PUT, put)?;

        if (block + 1) % 32 == 0 || block + 1 == num_blocks {
            log::debug!(target: "wireless::bsp::fw", "download: block {}/{}", block + 1, num_blocks);
        }
    }

    bus.indirect_write_32(ADDR_DWL_CTRL_AREA_HOST_STATUS, host_state::UPLOAD_COMPLETE)?;

    // 等待签名验证结果：AUTH_FAIL 为致命错误，预算用尽记下载超时
    let mut authenticated = false;
    for _ in 0..DOWNLOAD_POLL_RETRIES {
        match bus.indirect_read_32(host, ADDR_DWL_CTRL_AREA_NCP_STATUS)? {
            ncp_state::AUTH_OK => {
                authenticated = true;
                break;
            }
            ncp_state::AUTH_FAIL => return Err(Error::FirmwareAuthFailed),
            _ => host.wait_ms(REGISTER_POLL_TICK_MS),
        }
    }
    if !authenticated {
        return Err(Error::FirmwareDownloadTimeout);
    }

    bus.indirect_write_32(ADDR_DWL_CTRL_AREA_HOST_STATUS, host_state::OK_TO_JUMP)?;
    log::info!(target: "wireless::bsp::fw", "download complete, image authenticated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Transport;
    use alloc::collections::BTreeMap;
    use alloc::vec::Vec;
    use axerrno::AxError;

    /// 以共享内存模型演设备 bootloader：按主机状态写推进自身状态
    struct BootloaderModel {
        mem: BTreeMap<u32, u32>,
        sram_addr: u32,
        max_fill: u32,
        fail_auth: bool,
    }

    impl BootloaderModel {
        fn new() -> Self {
            let mut mem = BTreeMap::new();
            mem.insert(ADDR_DWL_CTRL_AREA_NCP_STATUS, ncp_state::NOT_READY);
            // 芯片 keyset 0x90（PTE +12 的 bit8..16）
            mem.insert(ADDR_PTE_INFO + 12, 0x90u32 << 8);
            Self {
                mem,
                sram_addr: 0,
                max_fill: 0,
                fail_auth: false,
            }
        }

        fn on_host_status(&mut self, status: u32) {
            let ncp = match status {
                host_state::READY => ncp_state::INFO_READY,
                host_state::HOST_INFO_READ => ncp_state::READY,
                host_state::UPLOAD_PENDING => ncp_state::DOWNLOAD_PENDING,
                host_state::UPLOAD_COMPLETE => {
                    if self.fail_auth {
                        ncp_state::AUTH_FAIL
                    } else {
                        ncp_state::AUTH_OK
                    }
                }
                _ => return,
            };
            self.mem.insert(ADDR_DWL_CTRL_AREA_NCP_STATUS, ncp);
        }
    }

    impl Transport for BootloaderModel {
        fn read(&mut self, addr: u32, buf: &mut [u8]) -> core::result::Result<(), AxError> {
            let reg = (addr >> 2) & 0x1F;
            let value = if reg == Register::Config as u32 {
                // 访问模式位常置，预取立即完成（位恒为清）
                0x0400
            } else if reg == Register::SramDport as u32 {
                *self.mem.get(&self.sram_addr).unwrap_or(&0)
            } else {
                0
            };
            buf[..4].copy_from_slice(&value.to_le_bytes());
            Ok(())
        }

        fn write(&mut self, addr: u32, buf: &[u8]) -> core::result::Result<(), AxError> {
            let reg = (addr >> 2) & 0x1F;
            if reg == Register::SramBaseAddr as u32 {
                self.sram_addr = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
            } else if reg == Register::SramDport as u32 && buf.len() == 4 {
                let value = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                self.mem.insert(self.sram_addr, value);
                if self.sram_addr == ADDR_DWL_CTRL_AREA_HOST_STATUS {
                    self.on_host_status(value);
                } else if self.sram_addr == ADDR_DWL_CTRL_AREA_PUT {
                    // 设备即时消费：get 跟随 put，同时记录峰值占用
                    let get = *self.mem.get(&ADDR_DWL_CTRL_AREA_GET).unwrap_or(&0);
                    self.max_fill = self.max_fill.max(value.wrapping_sub(get));
                    self.mem.insert(ADDR_DWL_CTRL_AREA_GET, value);
                }
            }
            // 固件数据块本体不建模内容，只关心游标
            Ok(())
        }
    }

    struct SliceSource {
        data: Vec<u8>,
        offset: usize,
    }

    impl FirmwareSource for SliceSource {
        fn size(&self) -> u32 {
            self.data.len() as u32
        }
        fn chunk(&mut self, len: usize) -> &[u8] {
            let start = self.offset;
            self.offset += len;
            &self.data[start..start + len]
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

    fn image(payload_len: usize, keyset: &[u8; 2]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"KEYSET");
        data.extend_from_slice(keyset);
        data.extend_from_slice(&[0u8; FW_SIGNATURE_SIZE]);
        data.extend_from_slice(&[0u8; FW_HASH_SIZE]);
        data.extend_from_slice(&alloc::vec![0xA5u8; payload_len]);
        data
    }

    #[test]
    fn download_completes_and_put_matches_payload_length() {
        let mut bus = RegisterBus::new(BootloaderModel::new());
        let payload_len = 3 * DOWNLOAD_BLOCK_SIZE as usize + 100;
        let mut fw = SliceSource {
            data: image(payload_len, b"90"),
            offset: 0,
        };
        download(&mut bus, &NoopHost, &mut fw).unwrap();

        let model = bus.transport_ref();
        assert_eq!(
            model.mem.get(&ADDR_DWL_CTRL_AREA_PUT),
            Some(&(payload_len as u32))
        );
        assert_eq!(
            model.mem.get(&ADDR_DWL_CTRL_AREA_IMAGE_SIZE),
            Some(&(payload_len as u32))
        );
        assert_eq!(
            model.mem.get(&ADDR_DWL_CTRL_AREA_HOST_STATUS),
            Some(&host_state::OK_TO_JUMP)
        );
        // 流控不变式：环内占用从未超过 环容量 - 块大小
        assert!(model.max_fill <= DOWNLOAD_FIFO_SIZE - DOWNLOAD_BLOCK_SIZE);
    }

    #[test]
    fn keyset_mismatch_rejected_before_upload() {
        let mut bus = RegisterBus::new(BootloaderModel::new());
        let mut fw = SliceSource {
            data: image(256, b"C0"),
            offset: 0,
        };
        assert_eq!(
            download(&mut bus, &NoopHost, &mut fw),
            Err(Error::FirmwareInvalidKeyset)
        );
        // keyset 拒绝发生在任何数据块进入下载环之前
        assert_eq!(bus.transport_ref().mem.get(&ADDR_DWL_CTRL_AREA_PUT), Some(&0));
    }

    #[test]
    fn auth_fail_is_fatal() {
        let mut model = BootloaderModel::new();
        model.fail_auth = true;
        let mut bus = RegisterBus::new(model);
        let mut fw = SliceSource {
            data: image(DOWNLOAD_BLOCK_SIZE as usize, b"90"),
            offset: 0,
        };
        assert_eq!(
            download(&mut bus, &NoopHost, &mut fw),
            Err(Error::FirmwareAuthFailed)
        );
    }
}
