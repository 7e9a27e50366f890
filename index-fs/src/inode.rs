//! # 索引节点层
//!
//! 位于内存的文件存储核心：[`IndexFileSystem`] 持有扇区缓存、
//! 空闲扇区表与打开表，[`Inode`] 是指向某个已打开inode的句柄。
//!
//! 同一扇区的inode在打开表中至多出现一次，重复打开共享同一条记录，
//! 这是`deny_write`与`remove`语义正确的前提。全部操作都在
//! 一把锁内完成，设备I/O对调用者而言是同步的。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::block_dev::BlockDevice;
use crate::cache::{FlushTimer, SectorCache};
use crate::clock::Clock;
use crate::error::{FsError, Result};
use crate::free_map::FreeMap;
use crate::layout::{DblIndirectBlock, DiskInode, IndirectBlock, SectorBudget};
use crate::{CACHE_CAPACITY, DIRECT_COUNT, INDIRECT_COUNT, MAX_FILE_SIZE, SECTOR_SIZE};

static ZERO_SECTOR: [u8; SECTOR_SIZE] = [0; SECTOR_SIZE];

pub struct IndexFileSystem {
    inner: Mutex<FsInner>,
}

struct FsInner {
    cache: SectorCache,
    free_map: Arc<dyn FreeMap>,
    /// 打开表，次序无关紧要
    open_inodes: Vec<OpenInode>,
    flush_timer: Option<FlushTimer>,
}

/// 打开表中的一条记录
struct OpenInode {
    /// inode所在扇区
    sector: u32,
    /// 打开计数
    open_count: u32,
    /// 大于0时写操作一律写0字节
    deny_write_count: u32,
    /// 已标记删除，最后一次close时回收整棵索引树
    removed: bool,
    /// 磁盘inode的内存副本，修改随写随落到缓存
    disk: Box<DiskInode>,
}

/// 已打开inode的句柄，每个句柄占一个打开计数
///
/// 句柄必须以 [`Inode::close`] 配对关闭。
pub struct Inode {
    fs: Arc<IndexFileSystem>,
    sector: u32,
}

impl IndexFileSystem {
    pub fn new(device: Arc<dyn BlockDevice>, free_map: Arc<dyn FreeMap>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(FsInner {
                cache: SectorCache::new(device, CACHE_CAPACITY),
                free_map,
                open_inodes: Vec::new(),
                flush_timer: None,
            }),
        })
    }

    /// 在`sector`上格式化一个长度为`length`字节的新inode，
    /// 分配全部后备扇区并填零。
    ///
    /// 分配中途失败时，本次已申请的扇区会全数归还。
    /// `sector`本身由调用者持有，不在此分配。
    pub fn create(&self, sector: u32, length: u32) -> Result<()> {
        let mut guard = self.inner.lock();
        let FsInner {
            cache, free_map, ..
        } = &mut *guard;

        let mut disk = DiskInode::new(sector);
        extend(cache, free_map.as_ref(), &mut disk, length)
    }

    /// 打开`sector`上的inode；已打开时共享同一条记录
    pub fn open(fs: &Arc<Self>, sector: u32) -> Result<Inode> {
        let mut guard = fs.inner.lock();
        let inner = &mut *guard;

        if let Some(entry) = inner.open_inodes.iter_mut().find(|e| e.sector == sector) {
            entry.open_count += 1;
        } else {
            let mut disk = Box::new(DiskInode::zeroed());
            inner.cache.read(sector, disk.as_bytes_mut())?;
            if !disk.is_valid() {
                return Err(FsError::NotFound);
            }
            // `this`字段仅供参考，以实际所在扇区为准
            disk.this = sector;
            inner.open_inodes.push(OpenInode {
                sector,
                open_count: 1,
                deny_write_count: 0,
                removed: false,
                disk,
            });
        }

        Ok(Inode {
            fs: fs.clone(),
            sector,
        })
    }

    /// 为周期冲刷接上计时源
    pub fn attach_flush_timer(&self, clock: Box<dyn Clock>) {
        self.inner.lock().flush_timer = Some(FlushTimer::new(clock));
    }

    /// 计时源到点则冲刷缓存，由外部定时调用
    pub fn poll_flush(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let due = match inner.flush_timer {
            Some(ref mut timer) => timer.due(),
            None => false,
        };
        if due {
            inner.cache.flush()
        } else {
            Ok(())
        }
    }

    /// 写回所有脏扇区并清空缓存
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().cache.flush()
    }

    /// 写回所有脏扇区，保留驻留
    pub fn sync_all(&self) -> Result<()> {
        self.inner.lock().cache.sync_all()
    }
}

impl Inode {
    /// inode编号，即其所在扇区
    #[inline]
    pub fn sector(&self) -> u32 {
        self.sector
    }

    /// 文件的字节长度
    pub fn length(&self) -> u32 {
        let mut guard = self.fs.inner.lock();
        find_entry(&mut guard.open_inodes, self.sector).disk.length
    }

    /// 再开一个句柄，打开计数加一
    pub fn reopen(&self) -> Inode {
        let mut guard = self.fs.inner.lock();
        find_entry(&mut guard.open_inodes, self.sector).open_count += 1;
        drop(guard);

        Inode {
            fs: self.fs.clone(),
            sector: self.sector,
        }
    }

    /// 关闭句柄。最后一个句柄关闭时记录离开打开表；
    /// 若此前已标记删除，则归还索引树拥有的全部扇区与inode扇区本身。
    pub fn close(self) {
        let mut guard = self.fs.inner.lock();
        let inner = &mut *guard;
        let index = inner
            .open_inodes
            .iter()
            .position(|e| e.sector == self.sector)
            .expect("inode handle must stay open");

        inner.open_inodes[index].open_count -= 1;
        if inner.open_inodes[index].open_count > 0 {
            return;
        }

        let entry = inner.open_inodes.swap_remove(index);
        if entry.removed {
            let FsInner {
                cache, free_map, ..
            } = inner;
            release_tree(cache, free_map.as_ref(), &entry.disk);
            free_map.release(entry.sector, 1);
        }
    }

    /// 标记删除；实际回收推迟到最后一次close
    pub fn remove(&self) {
        let mut guard = self.fs.inner.lock();
        find_entry(&mut guard.open_inodes, self.sector).removed = true;
    }

    /// 暂时禁止写入本inode
    pub fn deny_write(&self) {
        let mut guard = self.fs.inner.lock();
        let entry = find_entry(&mut guard.open_inodes, self.sector);
        entry.deny_write_count += 1;
        assert!(entry.deny_write_count <= entry.open_count);
    }

    /// 恢复写入，与 [`Inode::deny_write`] 配对调用
    pub fn allow_write(&self) {
        let mut guard = self.fs.inner.lock();
        let entry = find_entry(&mut guard.open_inodes, self.sector);
        assert!(entry.deny_write_count > 0);
        entry.deny_write_count -= 1;
    }

    /// 从指定字节偏移读出数据填充`buf`，返回实际读取的字节数。
    /// 到达文件末尾或缓存出错时提前返回，从不扩张文件。
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let mut guard = self.fs.inner.lock();
        let FsInner {
            cache, open_inodes, ..
        } = &mut *guard;
        let entry = find_entry(open_inodes, self.sector);

        let end = (offset + buf.len()).min(entry.disk.length as usize);
        if offset >= end {
            return 0;
        }

        let mut pos = offset;
        let mut read_size = 0;
        while pos < end {
            let sector = match locate(cache, &entry.disk, (pos / SECTOR_SIZE) as u64) {
                Ok(sector) => sector,
                Err(_) => break,
            };
            let sector_off = pos % SECTOR_SIZE;
            let chunk = (end - pos).min(SECTOR_SIZE - sector_off);

            let dst = &mut buf[read_size..read_size + chunk];
            let done = if sector_off == 0 && chunk == SECTOR_SIZE {
                cache.read(sector, dst)
            } else {
                cache.read_partial(sector, dst, sector_off)
            };
            if done.is_err() {
                break;
            }

            pos += chunk;
            read_size += chunk;
        }

        read_size
    }

    /// 把`buf`写入指定字节偏移处，返回实际写入的字节数。
    ///
    /// 写入范围超出文件长度时先扩张文件：一次性分配到新末尾的
    /// 全部数据扇区与新增的索引块，新扇区一律填零。
    /// 禁写期间写0字节；扩张失败时本次申请的扇区全数归还并写0字节。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let mut guard = self.fs.inner.lock();
        let FsInner {
            cache,
            free_map,
            open_inodes,
            ..
        } = &mut *guard;
        let entry = find_entry(open_inodes, self.sector);

        if entry.deny_write_count > 0 {
            return 0;
        }

        let end = offset + buf.len();
        if end > MAX_FILE_SIZE as usize {
            return 0;
        }
        if end > entry.disk.length as usize {
            // 在副本上扩张，成功才提交回打开表
            let mut disk = *entry.disk;
            if extend(cache, free_map.as_ref(), &mut disk, end as u32).is_err() {
                return 0;
            }
            *entry.disk = disk;
        }

        let mut pos = offset;
        let mut written = 0;
        while pos < end {
            let sector = match locate(cache, &entry.disk, (pos / SECTOR_SIZE) as u64) {
                Ok(sector) => sector,
                Err(_) => break,
            };
            let sector_off = pos % SECTOR_SIZE;
            let chunk = (end - pos).min(SECTOR_SIZE - sector_off);

            let src = &buf[written..written + chunk];
            let done = if sector_off == 0 && chunk == SECTOR_SIZE {
                cache.write(sector, src)
            } else {
                cache.write_partial(sector, src, sector_off)
            };
            if done.is_err() {
                break;
            }

            pos += chunk;
            written += chunk;
        }

        written
    }
}

fn find_entry(open_inodes: &mut [OpenInode], sector: u32) -> &mut OpenInode {
    open_inodes
        .iter_mut()
        .find(|e| e.sector == sector)
        .expect("inode handle must stay open")
}

/// 文件的第`index`个扇区（逻辑索引）对应的设备扇区号
fn locate(cache: &mut SectorCache, disk: &DiskInode, index: u64) -> Result<u32> {
    const DIRECT: u64 = DIRECT_COUNT as u64;
    const INDIRECT: u64 = INDIRECT_COUNT as u64;

    if index < DIRECT {
        return Ok(disk.direct[index as usize]);
    }

    if index < DIRECT + INDIRECT {
        let mut ind = IndirectBlock::zeroed();
        cache.read(disk.indirect, ind.as_bytes_mut())?;
        return Ok(ind.blocks[(index - DIRECT) as usize]);
    }

    // 先除得一级子块的位置，再模得子块内的位置
    let index = index - DIRECT - INDIRECT;
    let mut dbl = DblIndirectBlock::zeroed();
    cache.read(disk.dbl_indirect, dbl.as_bytes_mut())?;
    let mut ind = IndirectBlock::zeroed();
    cache.read(dbl.indirect[(index / INDIRECT) as usize], ind.as_bytes_mut())?;
    Ok(ind.blocks[(index % INDIRECT) as usize])
}

/// 把`disk`描述的文件扩张到`new_length`字节并写回inode记录。
///
/// 任何一步失败都会归还本次已申请的扇区；
/// 此时`disk`可能已被改动，调用者必须丢弃这个副本。
fn extend(
    cache: &mut SectorCache,
    free_map: &dyn FreeMap,
    disk: &mut DiskInode,
    new_length: u32,
) -> Result<()> {
    let mut allocated = Vec::new();
    match grow_tree(cache, free_map, disk, new_length, &mut allocated) {
        Ok(()) => Ok(()),
        Err(e) => {
            for sector in allocated {
                free_map.release(sector, 1);
            }
            Err(e)
        }
    }
}

fn grow_tree(
    cache: &mut SectorCache,
    free_map: &dyn FreeMap,
    disk: &mut DiskInode,
    new_length: u32,
    allocated: &mut Vec<u32>,
) -> Result<()> {
    debug_assert!(new_length >= disk.length);
    let old = SectorBudget::for_length(disk.length).expect("on-disk length is addressable");
    let new = SectorBudget::for_length(new_length)?;

    // 直接索引
    for i in old.direct..new.direct {
        disk.direct[i] = alloc_zeroed(cache, free_map, allocated)?;
    }

    // 一级间接索引
    if new.indirect > old.indirect {
        let mut ind;
        if disk.indirect_used == 0 {
            disk.indirect = alloc_sector(free_map, allocated)?;
            disk.indirect_used = 1;
            ind = IndirectBlock::new(disk.indirect, disk.this);
        } else {
            ind = IndirectBlock::zeroed();
            cache.read(disk.indirect, ind.as_bytes_mut())?;
        }
        for i in old.indirect..new.indirect {
            ind.blocks[i] = alloc_zeroed(cache, free_map, allocated)?;
        }
        ind.used = new.indirect as u32;
        cache.write(disk.indirect, ind.as_bytes())?;
    }

    // 二级间接索引
    if (new.dbl_full, new.dbl_remain) != (old.dbl_full, old.dbl_remain) {
        let mut dbl;
        if disk.dbl_indirect_used == 0 {
            disk.dbl_indirect = alloc_sector(free_map, allocated)?;
            disk.dbl_indirect_used = 1;
            dbl = DblIndirectBlock::new(disk.dbl_indirect, disk.this);
        } else {
            dbl = DblIndirectBlock::zeroed();
            cache.read(disk.dbl_indirect, dbl.as_bytes_mut())?;
        }

        for child in 0..new.children() {
            let want = new.child_entries(child);
            let have = old.child_entries(child);
            if want <= have {
                continue;
            }

            let mut ind;
            if have == 0 {
                let host = alloc_sector(free_map, allocated)?;
                dbl.indirect[child] = host;
                ind = IndirectBlock::new(host, disk.this);
            } else {
                ind = IndirectBlock::zeroed();
                cache.read(dbl.indirect[child], ind.as_bytes_mut())?;
            }
            for i in have..want {
                ind.blocks[i] = alloc_zeroed(cache, free_map, allocated)?;
            }
            ind.used = want as u32;
            cache.write(dbl.indirect[child], ind.as_bytes())?;
        }

        dbl.used = new.children() as u32;
        cache.write(disk.dbl_indirect, dbl.as_bytes())?;
    }

    disk.length = new_length;
    cache.write(disk.this, disk.as_bytes())
}

fn alloc_sector(free_map: &dyn FreeMap, allocated: &mut Vec<u32>) -> Result<u32> {
    let sector = free_map.allocate(1).ok_or(FsError::OutOfSpace)?;
    allocated.push(sector);
    Ok(sector)
}

/// 申请一个数据扇区并经缓存填零
fn alloc_zeroed(
    cache: &mut SectorCache,
    free_map: &dyn FreeMap,
    allocated: &mut Vec<u32>,
) -> Result<u32> {
    let sector = alloc_sector(free_map, allocated)?;
    cache.write(sector, &ZERO_SECTOR)?;
    Ok(sector)
}

/// 归还索引树拥有的全部扇区：每个数据扇区、
/// 每个一级索引块、二级索引块（inode扇区本身由调用者归还）
fn release_tree(cache: &mut SectorCache, free_map: &dyn FreeMap, disk: &DiskInode) {
    let budget = SectorBudget::for_length(disk.length).expect("on-disk length is addressable");

    for &sector in &disk.direct[..budget.direct] {
        free_map.release(sector, 1);
    }

    if disk.indirect_used != 0 {
        let mut ind = IndirectBlock::zeroed();
        if cache.read(disk.indirect, ind.as_bytes_mut()).is_ok() {
            for &sector in &ind.blocks[..budget.indirect] {
                free_map.release(sector, 1);
            }
        } else {
            log::error!("indirect block of inode {} unreadable, its data sectors leak", disk.this);
        }
        free_map.release(disk.indirect, 1);
    }

    if disk.dbl_indirect_used != 0 {
        let mut dbl = DblIndirectBlock::zeroed();
        if cache.read(disk.dbl_indirect, dbl.as_bytes_mut()).is_ok() {
            for child in 0..budget.children() {
                let host = dbl.indirect[child];
                let mut ind = IndirectBlock::zeroed();
                if cache.read(host, ind.as_bytes_mut()).is_ok() {
                    for &sector in &ind.blocks[..budget.child_entries(child)] {
                        free_map.release(sector, 1);
                    }
                } else {
                    log::error!("indirect child {host} unreadable, its data sectors leak");
                }
                free_map.release(host, 1);
            }
        } else {
            log::error!(
                "dbl-indirect block of inode {} unreadable, its subtree leaks",
                disk.this
            );
        }
        free_map.release(disk.dbl_indirect, 1);
    }
}
