use std::fs::OpenOptions;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use index_fs::{
    BlockDevice, Clock, DevError, FreeMap, FsError, IndexFileSystem, SectorCache, MAX_FILE_SIZE,
    SECTOR_SIZE,
};

use crate::{BlockFile, MemDisk, MemFreeMap};

fn setup(sectors: usize) -> (Arc<IndexFileSystem>, Arc<MemDisk>, Arc<MemFreeMap>) {
    let disk = Arc::new(MemDisk::new(sectors));
    let free_map = Arc::new(MemFreeMap::new(sectors as u32));
    let fs = IndexFileSystem::new(disk.clone(), free_map.clone());
    (fs, disk, free_map)
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/* ---------- 扇区缓存 ---------- */

#[test]
fn lru_evicts_least_recently_accessed() {
    let disk = Arc::new(MemDisk::new(8));
    let mut cache = SectorCache::new(disk, 2);
    let mut buf = [0u8; SECTOR_SIZE];

    cache.read(0, &mut buf).unwrap(); // miss
    cache.read(1, &mut buf).unwrap(); // miss
    cache.read(0, &mut buf).unwrap(); // hit, 0 becomes MRU
    cache.read(2, &mut buf).unwrap(); // miss, evicts 1

    assert!(cache.contains(0));
    assert!(cache.contains(2));
    assert!(!cache.contains(1));
    assert_eq!(2, cache.resident());
}

#[test]
fn eviction_writes_back_dirty_slot() {
    let disk = Arc::new(MemDisk::new(4));
    let mut cache = SectorCache::new(disk.clone(), 1);

    let payload = [0xA5u8; SECTOR_SIZE];
    cache.write(0, &payload).unwrap();
    // 写回策略：设备尚未被触碰
    assert_eq!(vec![0u8; SECTOR_SIZE], disk.snapshot(0));

    let mut buf = [0u8; SECTOR_SIZE];
    cache.read(1, &mut buf).unwrap(); // forces eviction of 0
    assert_eq!(payload.to_vec(), disk.snapshot(0));
}

#[test]
fn residency_stays_bounded() {
    let disk = Arc::new(MemDisk::new(64));
    let mut cache = SectorCache::new(disk, 4);
    let mut buf = [0u8; SECTOR_SIZE];

    for sector in 0..32 {
        cache.read(sector, &mut buf).unwrap();
        assert!(cache.resident() <= 4);
    }
    assert_eq!(4, cache.resident());
}

#[test]
fn flush_is_durable_and_idempotent() {
    let disk = Arc::new(MemDisk::new(8));
    let mut cache = SectorCache::new(disk.clone(), 8);

    for sector in 0..5u32 {
        let data = vec![sector as u8 + 1; SECTOR_SIZE];
        cache.write(sector, &data).unwrap();
    }

    cache.flush().unwrap();
    assert_eq!(0, cache.resident());
    for sector in 0..5u32 {
        assert_eq!(vec![sector as u8 + 1; SECTOR_SIZE], disk.snapshot(sector));
    }

    cache.flush().unwrap();
    for sector in 0..5u32 {
        assert_eq!(vec![sector as u8 + 1; SECTOR_SIZE], disk.snapshot(sector));
    }
}

#[test]
fn sync_all_keeps_residency() {
    let disk = Arc::new(MemDisk::new(4));
    let mut cache = SectorCache::new(disk.clone(), 4);

    let payload = [0x5Au8; SECTOR_SIZE];
    cache.write(2, &payload).unwrap();
    cache.sync_all().unwrap();

    assert_eq!(payload.to_vec(), disk.snapshot(2));
    assert!(cache.contains(2));
}

#[test]
fn partial_write_preserves_untouched_bytes() {
    let disk = Arc::new(MemDisk::new(4));
    let mut cache = SectorCache::new(disk, 2);

    let base: Vec<u8> = pattern(SECTOR_SIZE, 7);
    cache.write(0, &base).unwrap();
    cache.write_partial(0, &[0xEE; 16], 100).unwrap();

    let mut buf = [0u8; SECTOR_SIZE];
    cache.read(0, &mut buf).unwrap();
    assert_eq!(base[..100], buf[..100]);
    assert!(buf[100..116].iter().all(|&b| b == 0xEE));
    assert_eq!(base[116..], buf[116..]);
}

struct FailDisk;

impl BlockDevice for FailDisk {
    fn read_sector(&self, _sector: u32, _buf: &mut [u8]) -> Result<(), DevError> {
        Err(DevError)
    }

    fn write_sector(&self, _sector: u32, _buf: &[u8]) -> Result<(), DevError> {
        Err(DevError)
    }
}

#[test]
fn failed_read_is_not_inserted() {
    let mut cache = SectorCache::new(Arc::new(FailDisk), 4);
    let mut buf = [0u8; SECTOR_SIZE];

    assert_eq!(Err(FsError::Io), cache.read(0, &mut buf));
    assert_eq!(0, cache.resident());

    // 写未命中不触碰设备，因此仍然成功
    cache.write(0, &[1u8; SECTOR_SIZE]).unwrap();
    assert_eq!(1, cache.resident());
    cache.read(0, &mut buf).unwrap();
    assert_eq!([1u8; SECTOR_SIZE], buf);
}

/* ---------- 索引节点层 ---------- */

#[test]
fn small_file_round_trip() {
    let (fs, _disk, free_map) = setup(64);
    let sector = free_map.allocate(1).unwrap();

    fs.create(sector, 100).unwrap();
    let inode = IndexFileSystem::open(&fs, sector).unwrap();

    assert_eq!(5, inode.write_at(0, b"hello"));
    let mut buf = [0u8; 5];
    assert_eq!(5, inode.read_at(0, &mut buf));
    assert_eq!(b"hello", &buf);
    assert_eq!(100, inode.length());

    inode.close();
}

#[test]
fn unaligned_round_trip() {
    let (fs, _disk, free_map) = setup(64);
    let sector = free_map.allocate(1).unwrap();

    fs.create(sector, 0).unwrap();
    let inode = IndexFileSystem::open(&fs, sector).unwrap();

    let data = pattern(2000, 3);
    assert_eq!(2000, inode.write_at(300, &data));
    assert_eq!(2300, inode.length());

    let mut buf = vec![0u8; 2000];
    assert_eq!(2000, inode.read_at(300, &mut buf));
    assert_eq!(data, buf);

    inode.close();
}

#[test]
fn growth_crosses_into_indirect_blocks() {
    let (fs, _disk, free_map) = setup(256);
    let sector = free_map.allocate(1).unwrap();

    fs.create(sector, 0).unwrap();
    let inode = IndexFileSystem::open(&fs, sector).unwrap();

    // 第10块起进入一级间接索引区
    for (i, offset) in (0..=6144).step_by(SECTOR_SIZE).enumerate() {
        assert_eq!(1, inode.write_at(offset, &[i as u8 + 1]));
    }
    for (i, offset) in (0..=6144).step_by(SECTOR_SIZE).enumerate() {
        let mut byte = [0u8];
        assert_eq!(1, inode.read_at(offset, &mut byte));
        assert_eq!(i as u8 + 1, byte[0]);
    }
    assert_eq!(6145, inode.length());

    inode.close();
}

#[test]
fn growth_crosses_into_dbl_indirect_blocks() {
    let (fs, _disk, free_map) = setup(256);
    let sector = free_map.allocate(1).unwrap();

    fs.create(sector, 0).unwrap();
    let inode = IndexFileSystem::open(&fs, sector).unwrap();

    // (10 + 125) * 512：恰好越过一级间接索引的编号容量
    let offset = (10 + 125) * SECTOR_SIZE;
    assert_eq!(1, inode.write_at(offset, &[0x7E]));
    assert_eq!(offset as u32 + 1, inode.length());

    let mut byte = [0u8];
    assert_eq!(1, inode.read_at(offset, &mut byte));
    assert_eq!(0x7E, byte[0]);

    let mut prefix = vec![0xFFu8; offset];
    assert_eq!(offset, inode.read_at(0, &mut prefix));
    assert!(prefix.iter().all(|&b| b == 0));

    inode.close();
}

#[test]
fn create_honors_maximum_file_size() {
    let (fs, _disk, free_map) = setup(16384);

    let s0 = free_map.allocate(1).unwrap();
    fs.create(s0, MAX_FILE_SIZE).unwrap();

    let s1 = free_map.allocate(1).unwrap();
    assert_eq!(Err(FsError::TooLarge), fs.create(s1, MAX_FILE_SIZE + 1));
}

#[test]
fn failed_create_releases_every_reserved_sector() {
    let (fs, _disk, free_map) = setup(32);
    let sector = free_map.allocate(1).unwrap();
    let before = free_map.free_count();

    assert_eq!(
        Err(FsError::OutOfSpace),
        fs.create(sector, 100 * SECTOR_SIZE as u32)
    );
    assert_eq!(before, free_map.free_count());
}

#[test]
fn sparse_growth_reads_back_zeros() {
    let (fs, _disk, free_map) = setup(64);
    let sector = free_map.allocate(1).unwrap();

    fs.create(sector, 0).unwrap();
    let inode = IndexFileSystem::open(&fs, sector).unwrap();

    assert_eq!(1, inode.write_at(2000, &[0xAB]));
    assert_eq!(2001, inode.length());

    let mut gap = vec![0xFFu8; 2000];
    assert_eq!(2000, inode.read_at(0, &mut gap));
    assert!(gap.iter().all(|&b| b == 0));

    inode.close();
}

#[test]
fn deny_write_blocks_every_opener() {
    let (fs, _disk, free_map) = setup(64);
    let sector = free_map.allocate(1).unwrap();
    fs.create(sector, 16).unwrap();

    let first = IndexFileSystem::open(&fs, sector).unwrap();
    let second = IndexFileSystem::open(&fs, sector).unwrap();

    second.deny_write();
    assert_eq!(0, first.write_at(0, b"data"));
    let mut buf = [0xFFu8; 4];
    assert_eq!(4, first.read_at(0, &mut buf));
    assert_eq!([0u8; 4], buf);

    second.allow_write();
    assert_eq!(4, first.write_at(0, b"data"));

    first.close();
    second.close();
}

#[test]
fn remove_frees_the_whole_tree_at_last_close() {
    let (fs, _disk, free_map) = setup(128);
    let total_free = free_map.free_count();
    let sector = free_map.allocate(1).unwrap();

    // 15个数据扇区：10个直接 + 5个经一级间接索引块
    fs.create(sector, 15 * SECTOR_SIZE as u32).unwrap();
    assert_eq!(total_free - 17, free_map.free_count());

    let inode = IndexFileSystem::open(&fs, sector).unwrap();
    inode.remove();
    inode.close();

    assert_eq!(total_free, free_map.free_count());
    assert!(free_map.is_free(sector));
}

#[test]
fn openers_share_one_record() {
    let (fs, _disk, free_map) = setup(64);
    let sector = free_map.allocate(1).unwrap();
    fs.create(sector, 42).unwrap();

    let first = IndexFileSystem::open(&fs, sector).unwrap();
    let second = first.reopen();

    first.close();
    // 记录仍在打开表中
    assert_eq!(42, second.length());
    second.close();

    // 全部关闭后可重新装载
    let third = IndexFileSystem::open(&fs, sector).unwrap();
    assert_eq!(42, third.length());
    third.close();
}

#[test]
fn open_rejects_sector_without_inode() {
    let (fs, _disk, _free_map) = setup(64);
    assert!(matches!(IndexFileSystem::open(&fs, 9), Err(FsError::NotFound)));
}

#[test]
fn flush_makes_writes_visible_to_a_fresh_mount() {
    let (fs, disk, free_map) = setup(64);
    let sector = free_map.allocate(1).unwrap();

    fs.create(sector, 0).unwrap();
    let inode = IndexFileSystem::open(&fs, sector).unwrap();
    assert_eq!(10, inode.write_at(0, b"persist me"));
    inode.close();
    fs.flush().unwrap();

    let remount = IndexFileSystem::new(disk, free_map);
    let inode = IndexFileSystem::open(&remount, sector).unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(10, inode.read_at(0, &mut buf));
    assert_eq!(b"persist me", &buf);
    inode.close();
}

struct FakeClock(Arc<AtomicU64>);

impl Clock for FakeClock {
    fn ticks(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn tick_rate(&self) -> u64 {
        1000
    }
}

#[test]
fn periodic_flush_fires_after_the_interval() {
    let (fs, disk, free_map) = setup(64);
    let ticks = Arc::new(AtomicU64::new(0));
    fs.attach_flush_timer(Box::new(FakeClock(ticks.clone())));

    let sector = free_map.allocate(1).unwrap();
    fs.create(sector, 0).unwrap();

    // 间隔未到：inode记录还躺在缓存里
    fs.poll_flush().unwrap();
    assert_eq!(vec![0u8; SECTOR_SIZE], disk.snapshot(sector));

    ticks.store(30_000, Ordering::SeqCst);
    fs.poll_flush().unwrap();
    assert_ne!(vec![0u8; SECTOR_SIZE], disk.snapshot(sector));
}

#[test]
fn block_file_device_round_trip() {
    let path = std::env::temp_dir().join("index-fs-fuse-test.img");
    let _ = std::fs::remove_file(&path);

    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    fd.set_len(64 * SECTOR_SIZE as u64).unwrap();

    let device = Arc::new(BlockFile(Mutex::new(fd)));
    let free_map = Arc::new(MemFreeMap::new(64));
    let fs = IndexFileSystem::new(device, free_map.clone());

    let sector = free_map.allocate(1).unwrap();
    fs.create(sector, 0).unwrap();
    let inode = IndexFileSystem::open(&fs, sector).unwrap();
    let data = pattern(3 * SECTOR_SIZE + 17, 11);
    assert_eq!(data.len(), inode.write_at(0, &data));

    let mut buf = vec![0u8; data.len()];
    assert_eq!(data.len(), inode.read_at(0, &mut buf));
    assert_eq!(data, buf);

    inode.close();
    fs.flush().unwrap();
    std::fs::remove_file(&path).unwrap();
}
