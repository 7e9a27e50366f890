//! # 时钟接口层
//!
//! 缓存的周期冲刷需要一个单调计时源，
//! 本层不关心计时的具体来源（硬件定时器、`std`时钟等）。

/// 单调计时源特质
pub trait Clock: Send + Sync {
    /// 自某固定起点以来的tick数，单调不减
    fn ticks(&self) -> u64;

    /// 每秒tick数
    fn tick_rate(&self) -> u64;

    /// 距`t0`经过的tick数
    #[inline]
    fn elapsed(&self, t0: u64) -> u64 {
        self.ticks() - t0
    }
}
