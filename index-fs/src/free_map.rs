//! # 空闲扇区表接口层
//!
//! 记录设备扇区分配情况的位图由外部维护，
//! 索引节点层只通过 [`FreeMap`] 申请和归还扇区。

/// 空闲扇区表特质
///
/// 实现者自行保证分配与回收的原子性。
pub trait FreeMap: Send + Sync {
    /// 分配`count`个连续扇区，返回首个扇区号。
    /// 若空间用尽，则返回空。
    ///
    /// 索引节点层只会以`count == 1`调用。
    fn allocate(&self, count: u32) -> Option<u32>;

    /// 归还从`first`起的`count`个扇区
    fn release(&self, first: u32, count: u32);
}
