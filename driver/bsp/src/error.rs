//! 驱动错误类型
//!
//! 分层约定：总线/平台接口以 `AxError` 报告传输故障，驱动各层包装成统一的
//! [`Error`] 向上传播；固件下载、协议违例、缓冲池与流控各有独立变体，
//! 调用方可据此区分"设备报错"、"超时"与"总线故障"。

use axerrno::AxError;

/// 协议违例的具体原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// 消息头不合法（长度 < 4、非偶数或超出帧范围）
    BadHeader,
    /// 等待中的确认负载超过事件暂存区容量（不做静默截断）
    OversizedConfirmation,
    /// 下载握手期间设备状态字不是预期哨兵值
    UnexpectedNcpStatus(u32),
    /// 引导后 SRAM 探测字回读不符
    SramProbeFailed,
    /// 芯片唤醒后 CONFIG 的队列访问模式位未置起
    AccessModeNotSet,
    /// 间接写长度超出窗口化访问的上限
    IndirectLengthTooLarge,
}

/// 驱动统一错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 总线 I/O 失败。对当前操作致命，本层不重试
    Transport(AxError),
    /// 有界轮询/等待用尽预算
    Timeout,
    /// 缓冲池耗尽，或请求尺寸超过该池块大小
    OutOfBuffers,
    /// 帧或设备状态不符合协议契约
    Protocol(ProtocolViolation),
    /// 设备在确认中报告了非零状态码
    DeviceStatus(u32),
    /// 固件下载握手/流控轮询超时（区别于一般 Timeout 与总线故障）
    FirmwareDownloadTimeout,
    /// 固件镜像 keyset 与芯片不匹配
    FirmwareInvalidKeyset,
    /// 设备拒绝固件签名。需要整机复位才能恢复
    FirmwareAuthFailed,
    /// 设备拒绝回滚保护请求
    FirmwareRollbackRejected,
    /// 设备尚未上报启动指示
    NotStarted,
    /// 发送会超过设备接收队列（发送信用用尽）
    WouldExceedDeviceQueue,
    /// 已有未决的同步等待时再次 arm
    WaitAlreadyArmed,
    /// 缓冲归还类型不符或归还次数超过池容量
    PoolMisuse,
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<AxError> for Error {
    fn from(e: AxError) -> Self {
        Error::Transport(e)
    }
}
