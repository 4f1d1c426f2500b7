//! 无线网络协处理器主机侧驱动
//!
//! 整合三个组成 crate：
//! - bsp：总线寄存器层、事件关联器、固件下载（平台接口也在这里）
//! - pool：类型化缓冲池与发送信用
//! - fdrv：消息编解码、指示派发、接收环、命令面
//!
//! 典型接入：平台实现 `Transport` + `HostOps` + `FirmwareSource`，
//! 网络栈实现 `IndicationHandler`，然后
//!
//! ```ignore
//! let device = fdrv::WifiDevice::new(transport, host, handler);
//! device.start(&mut firmware)?;            // 复位、下载固件、等启动指示
//! device.join(&params)?;                   // 同步命令
//! // 中断工作线程：
//! loop {
//!     wait_for_device_irq();
//!     let _ = device.process_interrupt();  // 单一总线锁内排空输出队列
//! }
//! ```
//!
//! 一个设备一个 `WifiDevice` 句柄；多设备即多句柄，没有进程级全局。

#![no_std]

pub use bsp;
pub use fdrv;
pub use pool;

pub use bsp::{Error, FirmwareSource, HostOps, Result, Transport};
pub use fdrv::{IndicationHandler, Interface, WifiDevice};
