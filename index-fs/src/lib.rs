#![no_std]

extern crate alloc;

/* index-fs 的整体架构，自上而下 */

// 索引节点层：打开表与按字节偏移的读写、文件增长
mod inode;
pub use inode::{IndexFileSystem, Inode};

// 磁盘数据结构层：表示磁盘上inode与索引块的数据结构
pub mod layout;

// 扇区缓存层：内存上的磁盘扇区数据缓存（写回 + LRU）
mod cache;
pub use cache::{FlushTimer, SectorCache, FLUSH_PERIOD_SECS};

// 块设备接口层：读写扇区设备的接口
mod block_dev;
pub use block_dev::{BlockDevice, DevError};

// 空闲扇区表接口层：扇区的分配与回收
mod free_map;
pub use free_map::FreeMap;

// 时钟接口层：只用于决定何时冲刷缓存
mod clock;
pub use clock::Clock;

mod error;
pub use error::{FsError, Result};

/// 合法inode的标识
pub const INODE_MAGIC: u32 = 0x494E_4F44;
pub const SECTOR_SIZE: usize = 512;
/// 缓存槽数的上限
pub const CACHE_CAPACITY: usize = 64;

/// inode内嵌的直接索引数
pub const DIRECT_COUNT: usize = 10;
/// 每个间接索引块的编号容量
pub const INDIRECT_COUNT: usize = 125;
/// 二级间接索引块可指向的间接索引块数
pub const DBL_INDIRECT_COUNT: usize = 125;

/// 单个文件可索引的扇区总数
pub const MAX_FILE_SECTORS: u64 =
    (DIRECT_COUNT + INDIRECT_COUNT + DBL_INDIRECT_COUNT * INDIRECT_COUNT) as u64;
/// 单个文件的字节容量上限，约8MiB
pub const MAX_FILE_SIZE: u32 = MAX_FILE_SECTORS as u32 * SECTOR_SIZE as u32;
