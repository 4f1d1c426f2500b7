//! 轮询节拍与重试预算
//!
//! 所有阻塞路径的超时行为由这里的常量决定，不在调用点写裸数字，
//! 便于用假时钟做确定性测试。

/// 事件等待轮询节拍 (ms)
pub const EVENT_WAIT_TICK_MS: u32 = 1;

/// 同步命令默认超时 (ms)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u32 = 5_000;

/// 寄存器轮询间隔 (ms)
pub const REGISTER_POLL_TICK_MS: u32 = 1;

/// 间接读预取位轮询次数上限
pub const PREFETCH_POLL_RETRIES: u32 = 20;

/// 置 WUP 位后等待 RDY 位的轮询次数上限
pub const WAKEUP_POLL_RETRIES: u32 = 200;

/// 固件下载握手与 put/get 流控的轮询次数上限
pub const DOWNLOAD_POLL_RETRIES: u32 = 100;

/// 缓冲分配阻塞重试节拍 (ms)
pub const ALLOC_WAIT_TICK_MS: u32 = 1;
