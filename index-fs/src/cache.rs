//! # 扇区缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的扇区复制到内存中，提高对块设备的操作效率。
//!
//! 缓存采用**写回**策略：写操作只落在缓存槽上并标脏，
//! 直到槽被逐出、或被 [`SectorCache::sync_all`]/[`SectorCache::flush`]
//! 冲刷时才真正写入设备。槽数触及上限时，逐出最久未访问的槽（LRU）。
//!
//! 上层对设备的一切操作都经过缓存层；周期冲刷由 [`FlushTimer`] 决定，
//! 冲刷会清空驻留，之后的访问将以冷未命中重新装载。

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::block_dev::BlockDevice;
use crate::clock::Clock;
use crate::error::{FsError, Result};
use crate::SECTOR_SIZE;

/// 周期冲刷的间隔（秒）
pub const FLUSH_PERIOD_SECS: u64 = 30;

/// 内存中的扇区缓存，持有全部驻留槽
pub struct SectorCache {
    /// 底层块设备的引用
    device: Arc<dyn BlockDevice>,
    /// 槽数上限
    capacity: usize,
    /// 扇区号到驻留槽的映射，每个扇区至多占一个槽
    slots: BTreeMap<u32, Slot>,
    /// 访问次序，队首为最近使用，队尾为逐出候选
    recency: VecDeque<u32>,
}

/// 单个驻留槽
struct Slot {
    /// 缓存的数据
    data: Box<[u8]>,
    /// 是否为脏槽
    dirty: bool,
}

impl SectorCache {
    pub fn new(device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            device,
            capacity,
            slots: BTreeMap::new(),
            recency: VecDeque::new(),
        }
    }

    /// 读出整个扇区到`dst`
    pub fn read(&mut self, sector: u32, dst: &mut [u8]) -> Result<()> {
        assert_eq!(dst.len(), SECTOR_SIZE);

        if let Some(slot) = self.slots.get(&sector) {
            dst.copy_from_slice(&slot.data);
            self.touch(sector);
            return Ok(());
        }

        // 未命中：先装载再复制
        let mut data = Slot::try_buffer()?;
        if self.device.read_sector(sector, &mut data).is_err() {
            // 读失败的扇区不驻留
            return Err(FsError::Io);
        }
        dst.copy_from_slice(&data);
        self.insert(sector, Slot { data, dirty: false });

        Ok(())
    }

    /// 用`src`覆盖整个扇区，之后的读都将观察到`src`
    pub fn write(&mut self, sector: u32, src: &[u8]) -> Result<()> {
        assert_eq!(src.len(), SECTOR_SIZE);

        if let Some(slot) = self.slots.get_mut(&sector) {
            slot.data.copy_from_slice(src);
            slot.dirty = true;
            self.touch(sector);
            return Ok(());
        }

        // 写回策略：未命中时填充新槽并标脏，不触碰设备
        let mut data = Slot::try_buffer()?;
        data.copy_from_slice(src);
        self.insert(sector, Slot { data, dirty: true });

        Ok(())
    }

    /// 读出扇区内`[offset, offset + dst.len())`的数据
    pub fn read_partial(&mut self, sector: u32, dst: &mut [u8], offset: usize) -> Result<()> {
        assert!(offset + dst.len() <= SECTOR_SIZE);

        let mut bounce = [0u8; SECTOR_SIZE];
        self.read(sector, &mut bounce)?;
        dst.copy_from_slice(&bounce[offset..offset + dst.len()]);

        Ok(())
    }

    /// 把`src`写入扇区内`[offset, offset + src.len())`，其余字节保持原样
    pub fn write_partial(&mut self, sector: u32, src: &[u8], offset: usize) -> Result<()> {
        assert!(offset + src.len() <= SECTOR_SIZE);

        let mut bounce = [0u8; SECTOR_SIZE];
        // 覆盖整个扇区时不需要读出旧数据
        if !(offset == 0 && src.len() == SECTOR_SIZE) {
            self.read(sector, &mut bounce)?;
        }
        bounce[offset..offset + src.len()].copy_from_slice(src);
        self.write(sector, &bounce)
    }

    /// 将所有脏槽写回设备，保留驻留
    pub fn sync_all(&mut self) -> Result<()> {
        for (&sector, slot) in self.slots.iter_mut() {
            if slot.dirty {
                self.device.write_sector(sector, &slot.data)?;
                slot.dirty = false;
            }
        }
        Ok(())
    }

    /// 将所有脏槽写回设备并清空缓存
    pub fn flush(&mut self) -> Result<()> {
        self.sync_all()?;
        self.slots.clear();
        self.recency.clear();
        Ok(())
    }

    /// 当前驻留的槽数
    #[inline]
    pub fn resident(&self) -> usize {
        debug_assert_eq!(self.slots.len(), self.recency.len());
        self.slots.len()
    }

    #[inline]
    pub fn contains(&self, sector: u32) -> bool {
        self.slots.contains_key(&sector)
    }
}

impl SectorCache {
    /// 把命中的扇区提到最近使用位
    fn touch(&mut self, sector: u32) {
        let index = self
            .recency
            .iter()
            .position(|&id| id == sector)
            .expect("resident sector must be in recency order");
        self.recency.remove(index);
        self.recency.push_front(sector);
    }

    /// 登记新槽；触及上限时先逐出最久未访问的槽
    fn insert(&mut self, sector: u32, slot: Slot) {
        if self.slots.len() == self.capacity {
            self.evict_lru();
        }
        self.slots.insert(sector, slot);
        self.recency.push_front(sector);
    }

    fn evict_lru(&mut self) {
        let victim = self.recency.pop_back().expect("cache is non-empty");
        let slot = self.slots.remove(&victim).expect("recency order matches slots");

        if slot.dirty {
            // 逐出时的写回失败只记录，脏数据随槽一起丢弃
            if self.device.write_sector(victim, &slot.data).is_err() {
                log::error!("write-back of sector {victim} failed, dropping dirty slot");
            }
        }
    }
}

impl Slot {
    /// 申请一个扇区大小的缓冲区，失败时报告内存不足
    fn try_buffer() -> Result<Box<[u8]>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(SECTOR_SIZE)
            .map_err(|_| FsError::OutOfMemory)?;
        buf.resize(SECTOR_SIZE, 0);
        Ok(buf.into_boxed_slice())
    }
}

impl Drop for SectorCache {
    fn drop(&mut self) {
        if self.sync_all().is_err() {
            log::error!("final write-back failed, dirty sectors lost");
        }
    }
}

/// 周期冲刷的计时器
///
/// 每经过 [`FLUSH_PERIOD_SECS`]，[`FlushTimer::due`] 返回一次真；
/// 与其它缓存操作的互斥由调用者的锁保证。
pub struct FlushTimer {
    clock: Box<dyn Clock>,
    last_flush: u64,
}

impl FlushTimer {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        let last_flush = clock.ticks();
        Self { clock, last_flush }
    }

    /// 是否到达冲刷时点；是则顺带重置计时
    pub fn due(&mut self) -> bool {
        let period = FLUSH_PERIOD_SECS * self.clock.tick_rate();
        if self.clock.elapsed(self.last_flush) >= period {
            self.last_flush = self.clock.ticks();
            true
        } else {
            false
        }
    }
}
