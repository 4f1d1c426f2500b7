//! 固定块缓冲池与发送信用
//!
//! 每类缓冲各一个池，块大小与块数在构造时定死；超过块大小的请求
//! 直接报 `OutOfBuffers`，绝不扩容。归还按类型校验，归还数超过池
//! 容量视为误用。发送信用把在途发送帧数限制在设备通告的接收缓冲
//! 数以内。

use alloc::vec::Vec;

use bsp::{Error, Result, ALLOC_WAIT_TICK_MS};

use crate::buffer::{Buffer, BufferKind};

/// 帧池块大小：最大以太帧 + 消息头，并为块总线补齐留量
pub const FRAME_BLOCK_SIZE: usize = 2048;
/// 控制消息池块大小（与事件暂存区同级）
pub const CONTROL_BLOCK_SIZE: usize = 512;
/// 扫描结果池块大小
pub const SCAN_BLOCK_SIZE: usize = 512;

const TX_FRAME_COUNT: usize = 8;
const RX_FRAME_COUNT: usize = 8;
const CONTROL_COUNT: usize = 4;
const SCAN_COUNT: usize = 4;

/// 单一类型的固定块池
pub struct BufferPool {
    kind: BufferKind,
    block_size: usize,
    free: Vec<Buffer>,
    total: usize,
}

impl BufferPool {
    pub fn new(kind: BufferKind, block_size: usize, count: usize) -> Self {
        let free = (0..count).map(|_| Buffer::new(kind, block_size)).collect();
        Self {
            kind,
            block_size,
            free,
            total: count,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 空闲块数
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// 取一个块。`size` 超过块大小立即 `OutOfBuffers`（不是扩容）；
    /// 池空返回 `Ok(None)`，由调用方决定重试或放弃
    pub fn try_allocate(&mut self, size: usize) -> Result<Option<Buffer>> {
        if size > self.block_size {
            log::warn!(target: "wireless::pool", "{:?}: request {} exceeds block size {}", self.kind, size, self.block_size);
            return Err(Error::OutOfBuffers);
        }
        Ok(self.free.pop().map(|mut b| {
            b.reset();
            b
        }))
    }

    /// 归还一个块。类型不符或归还次数超过池容量报 `PoolMisuse`
    pub fn free(&mut self, buffer: Buffer) -> Result<()> {
        if buffer.kind() != self.kind || self.free.len() >= self.total {
            log::warn!(target: "wireless::pool", "{:?}: bad free (kind {:?}, occupancy {}/{})", self.kind, buffer.kind(), self.free.len(), self.total);
            return Err(Error::PoolMisuse);
        }
        self.free.push(buffer);
        Ok(())
    }
}

/// 四类缓冲池的集合
pub struct PoolSet {
    tx_frame: BufferPool,
    rx_frame: BufferPool,
    control: BufferPool,
    scan: BufferPool,
}

impl PoolSet {
    /// 默认几何：帧池 2048B x 8，控制/扫描池 512B x 4
    pub fn new() -> Self {
        Self {
            tx_frame: BufferPool::new(BufferKind::TxFrame, FRAME_BLOCK_SIZE, TX_FRAME_COUNT),
            rx_frame: BufferPool::new(BufferKind::RxFrame, FRAME_BLOCK_SIZE, RX_FRAME_COUNT),
            control: BufferPool::new(BufferKind::Control, CONTROL_BLOCK_SIZE, CONTROL_COUNT),
            scan: BufferPool::new(BufferKind::ScanResult, SCAN_BLOCK_SIZE, SCAN_COUNT),
        }
    }

    fn pool_mut(&mut self, kind: BufferKind) -> &mut BufferPool {
        match kind {
            BufferKind::TxFrame => &mut self.tx_frame,
            BufferKind::RxFrame => &mut self.rx_frame,
            BufferKind::Control => &mut self.control,
            BufferKind::ScanResult => &mut self.scan,
        }
    }

    fn pool(&self, kind: BufferKind) -> &BufferPool {
        match kind {
            BufferKind::TxFrame => &self.tx_frame,
            BufferKind::RxFrame => &self.rx_frame,
            BufferKind::Control => &self.control,
            BufferKind::ScanResult => &self.scan,
        }
    }

    pub fn try_allocate(&mut self, kind: BufferKind, size: usize) -> Result<Option<Buffer>> {
        self.pool_mut(kind).try_allocate(size)
    }

    /// 阻塞分配：池空时每个节拍经 `wait` 让出一次，直到超时。
    /// `timeout_ms` 为 0 表示只试一次
    pub fn allocate(
        &mut self,
        kind: BufferKind,
        size: usize,
        timeout_ms: u32,
        mut wait: impl FnMut(u32),
    ) -> Result<Buffer> {
        let mut waited = 0u32;
        loop {
            if let Some(buffer) = self.try_allocate(kind, size)? {
                return Ok(buffer);
            }
            if waited >= timeout_ms {
                return Err(Error::Timeout);
            }
            wait(ALLOC_WAIT_TICK_MS);
            waited += ALLOC_WAIT_TICK_MS;
        }
    }

    pub fn free(&mut self, buffer: Buffer) -> Result<()> {
        self.pool_mut(buffer.kind()).free(buffer)
    }

    pub fn available(&self, kind: BufferKind) -> usize {
        self.pool(kind).available()
    }

    pub fn block_size(&self, kind: BufferKind) -> usize {
        self.pool(kind).block_size()
    }
}

impl Default for PoolSet {
    fn default() -> Self {
        Self::new()
    }
}

/// 发送信用：在途发送帧数 `used` 不得达到设备通告上限 `limit`
/// （上限已按设备值减一，保证控制命令永远有一个入口缓冲可用）
pub struct TxCredit {
    used: u16,
    limit: u16,
}

impl TxCredit {
    pub const fn new() -> Self {
        Self { used: 0, limit: 0 }
    }

    /// 启动指示到达后按设备通告值设定
    pub fn set_limit(&mut self, limit: u16) {
        self.limit = limit;
    }

    pub fn can_send(&self) -> bool {
        self.used < self.limit
    }

    /// 占用一份信用（发送前调用）。用尽时给出显式错误而非静默成功
    pub fn take(&mut self) -> Result<()> {
        if !self.can_send() {
            return Err(Error::WouldExceedDeviceQueue);
        }
        self.used += 1;
        Ok(())
    }

    /// 发送确认到达时释放一份信用
    pub fn release(&mut self) {
        if self.used == 0 {
            log::warn!(target: "wireless::pool", "credit release with none in flight");
            return;
        }
        self.used -= 1;
    }

    pub fn used(&self) -> u16 {
        self.used
    }

    pub fn limit(&self) -> u16 {
        self.limit
    }
}

impl Default for TxCredit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_keeps_occupancy() {
        let mut pools = PoolSet::new();
        let before = pools.available(BufferKind::Control);
        let a = pools.try_allocate(BufferKind::Control, 64).unwrap().unwrap();
        let b = pools.try_allocate(BufferKind::Control, 64).unwrap().unwrap();
        assert_eq!(pools.available(BufferKind::Control), before - 2);
        pools.free(a).unwrap();
        pools.free(b).unwrap();
        assert_eq!(pools.available(BufferKind::Control), before);
    }

    #[test]
    fn oversized_request_is_out_of_buffers() {
        let mut pools = PoolSet::new();
        let result = pools.try_allocate(BufferKind::TxFrame, FRAME_BLOCK_SIZE + 1);
        assert_eq!(result.unwrap_err(), Error::OutOfBuffers);
        // 池占用不受影响
        assert_eq!(pools.available(BufferKind::TxFrame), 8);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let mut pools = PoolSet::new();
        let mut held = alloc::vec::Vec::new();
        while let Some(b) = pools.try_allocate(BufferKind::Control, 16).unwrap() {
            held.push(b);
        }
        let mut ticks = 0u32;
        let result = pools.allocate(BufferKind::Control, 16, 3, |_| ticks += 1);
        assert_eq!(result.unwrap_err(), Error::Timeout);
        assert_eq!(ticks, 3);
        // 归还一块后阻塞分配立即成功
        pools.free(held.pop().unwrap()).unwrap();
        let b = pools.allocate(BufferKind::Control, 16, 0, |_| {}).unwrap();
        pools.free(b).unwrap();
        for b in held {
            pools.free(b).unwrap();
        }
    }

    #[test]
    fn overfree_is_misuse() {
        let mut pool = BufferPool::new(BufferKind::Control, 64, 1);
        let held = pool.try_allocate(16).unwrap().unwrap();
        // 伪造一个不属于该池类型的块
        let foreign = Buffer::new(BufferKind::TxFrame, 64);
        assert_eq!(pool.free(foreign), Err(Error::PoolMisuse));
        pool.free(held).unwrap();
        let extra = Buffer::new(BufferKind::Control, 64);
        assert_eq!(pool.free(extra), Err(Error::PoolMisuse));
    }

    #[test]
    fn credit_round_trip() {
        let mut credit = TxCredit::new();
        credit.set_limit(2);
        assert!(credit.can_send());
        credit.take().unwrap();
        credit.take().unwrap();
        assert!(!credit.can_send());
        assert_eq!(credit.take(), Err(Error::WouldExceedDeviceQueue));
        credit.release();
        assert!(credit.can_send());
        credit.release();
        assert_eq!(credit.used(), 0);
    }
}
