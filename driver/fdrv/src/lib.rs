//! 全 MAC 驱动核心：消息编解码、指示派发、接收环与命令面
//!
//! - [`hif`]：通用消息头与消息号（显式移位/掩码编解码）
//! - [`wfm`]：各命令体构建与指示解析
//! - [`dispatch`]：指示回调接口与单帧派发
//! - [`device`]：设备句柄（总线锁、接收环、同步等待、发送信用）
//! - [`commands`]：join/scan/start_ap 等同步命令
//!
//! 平台注入 `Transport`/`HostOps`/`FirmwareSource`（见 bsp crate），
//! 网络栈经 [`IndicationHandler`] 接收事件与以太帧。

#![no_std]

extern crate alloc;

mod commands;
mod context;
mod device;
mod dispatch;
pub mod hif;
pub mod wfm;

pub use context::{status_flags, DeviceContext, SecureLinkNonce};
pub use device::WifiDevice;
pub use dispatch::{IndicationHandler, NullHandler};
pub use hif::{Interface, MsgHeader};
pub use wfm::{
    ApClientDisconnectedInd, ApParameters, ConnectInd, DisconnectInd, JoinParameters, PowerMode,
    ReceivedInd, ScanMode, ScanParameters, ScanResultInd, SecurityMode, SendFrameCnf, StartupInd,
};
