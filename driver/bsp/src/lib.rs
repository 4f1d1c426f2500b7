//! 无线协处理器 BSP：总线寄存器层、事件关联器、固件加载
//!
//! 功能包括：
//! - 平台注入接口（[`Transport`]、[`HostOps`]、[`FirmwareSource`]）
//! - 带类型的寄存器访问与帧队列读写（[`RegisterBus`]）
//! - 同步命令的单槽事件等待（[`EventSlot`]）
//! - 芯片引导与流控式固件下载（[`fw_load`]）
//!
//! 本 crate 不做任何调度与加锁，串行化由上层的单一总线锁保证。

#![no_std]

extern crate alloc;

mod bus;
mod config;
mod error;
mod event;
pub mod fw_load;

pub use bus::{
    HostOps, Register, RegisterBus, Transport, BLOCK_MODE_THRESHOLD, CONFIG_ACCESS_MODE_BIT,
    CONFIG_CPU_CLK_DIS_BIT, CONFIG_CPU_RESET_BIT, CONFIG_IRQ_RDY_ENABLE, CONFIG_PREFETCH_BIT,
    CONT_NEXT_LEN_MASK, CONT_RDY_BIT, CONT_WUP_BIT, CTRL_TRAILER_SIZE,
};
pub use config::{
    ALLOC_WAIT_TICK_MS, DEFAULT_REQUEST_TIMEOUT_MS, DOWNLOAD_POLL_RETRIES, EVENT_WAIT_TICK_MS,
    PREFETCH_POLL_RETRIES, REGISTER_POLL_TICK_MS, WAKEUP_POLL_RETRIES,
};
pub use error::{Error, ProtocolViolation, Result};
pub use event::{EventPayload, EventSlot, EVENT_PAYLOAD_CAPACITY};
pub use fw_load::FirmwareSource;
