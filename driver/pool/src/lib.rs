//! 类型化缓冲池与发送信用
//!
//! 发送帧、接收帧、控制、扫描结果四类缓冲各自成池，块大小固定；
//! 加上把在途发送帧数压在设备接收队列容量内的信用计数。
//! 无内部锁，由驱动的总线锁统一串行化。

#![no_std]

extern crate alloc;

mod buffer;
mod pool;

pub use buffer::{Buffer, BufferKind};
pub use pool::{
    BufferPool, PoolSet, TxCredit, CONTROL_BLOCK_SIZE, FRAME_BLOCK_SIZE, SCAN_BLOCK_SIZE,
};
