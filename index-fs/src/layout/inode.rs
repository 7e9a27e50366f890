//! 磁盘上的inode记录与索引树的扇区预算
//!
//! ## 索引编码
//!
//! 文件的第`b`个扇区（逻辑索引）按三段定位：
//! - `b < DIRECT_COUNT`：直接索引，编号内嵌在inode里
//! - 其后 [`INDIRECT_COUNT`] 个：经一级间接索引块
//! - 再后 `DBL_INDIRECT_COUNT × INDIRECT_COUNT` 个：
//!   经二级间接索引块，先除后模得到一级块位置与块内位置

use core::mem;
use core::ptr;
use core::slice;

use crate::error::{FsError, Result};
use crate::{
    DBL_INDIRECT_COUNT, DIRECT_COUNT, INDIRECT_COUNT, INODE_MAGIC, MAX_FILE_SECTORS, SECTOR_SIZE,
};

/// 填充至整扇区所需的字数
const PAD_WORDS: usize = 110;

/// 磁盘上的inode，恰好占一个扇区
///
/// 字段次序即磁盘字节次序，不可调整。
#[derive(Clone, Copy)]
#[repr(C)]
pub struct DiskInode {
    /// 遗留字段，恒为0
    pub start: u32,
    /// 直接索引，存储数据扇区号
    pub direct: [u32; DIRECT_COUNT],
    /// 文件的字节长度
    pub length: u32,
    /// 本inode所在的扇区号
    pub this: u32,
    /// 一级间接索引块所在扇区
    pub indirect: u32,
    /// 二级间接索引块所在扇区
    pub dbl_indirect: u32,
    /// 一级间接索引块是否已分配
    pub indirect_used: u32,
    /// 二级间接索引块是否已分配
    pub dbl_indirect_used: u32,
    /// 魔数：校验inode合法性
    pub magic: u32,
    unused: [u32; PAD_WORDS],
}

const _: () = assert!(mem::size_of::<DiskInode>() == SECTOR_SIZE);

impl DiskInode {
    pub fn zeroed() -> Self {
        Self {
            start: 0,
            direct: [0; DIRECT_COUNT],
            length: 0,
            this: 0,
            indirect: 0,
            dbl_indirect: 0,
            indirect_used: 0,
            dbl_indirect_used: 0,
            magic: 0,
            unused: [0; PAD_WORDS],
        }
    }

    /// 描述空文件的新inode
    pub fn new(this: u32) -> Self {
        Self {
            this,
            magic: INODE_MAGIC,
            ..Self::zeroed()
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }

    /// 容纳指定字节数所需的数据扇区数
    #[inline]
    pub fn sectors_for(length: u32) -> u64 {
        (length as u64).div_ceil(SECTOR_SIZE as u64)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), SECTOR_SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), SECTOR_SIZE) }
    }
}

/// 给定数据扇区总数，索引树各段各承担多少
///
/// `dbl_full`计满员的一级子块，`dbl_remain`是收尾子块内的编号数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorBudget {
    pub direct: usize,
    pub indirect: usize,
    pub dbl_full: usize,
    pub dbl_remain: usize,
}

impl SectorBudget {
    /// 逐段剥离扇区数；超出索引树的编号范围则失败
    pub fn for_sectors(mut sectors: u64) -> Result<Self> {
        if sectors > MAX_FILE_SECTORS {
            return Err(FsError::TooLarge);
        }

        let direct = sectors.min(DIRECT_COUNT as u64);
        sectors -= direct;

        let indirect = sectors.min(INDIRECT_COUNT as u64);
        sectors -= indirect;

        let dbl_full = (sectors / INDIRECT_COUNT as u64).min(DBL_INDIRECT_COUNT as u64);
        sectors -= dbl_full * INDIRECT_COUNT as u64;

        let dbl_remain = sectors % INDIRECT_COUNT as u64;
        sectors -= dbl_remain;

        debug_assert_eq!(sectors, 0);

        Ok(Self {
            direct: direct as usize,
            indirect: indirect as usize,
            dbl_full: dbl_full as usize,
            dbl_remain: dbl_remain as usize,
        })
    }

    #[inline]
    pub fn for_length(length: u32) -> Result<Self> {
        Self::for_sectors(DiskInode::sectors_for(length))
    }

    /// 二级索引下的一级子块数（含收尾的非满员子块）
    #[inline]
    pub fn children(&self) -> usize {
        self.dbl_full + (self.dbl_remain > 0) as usize
    }

    /// 第`child`个一级子块内已使用的编号数
    pub fn child_entries(&self, child: usize) -> usize {
        if child < self.dbl_full {
            INDIRECT_COUNT
        } else if child == self.dbl_full {
            self.dbl_remain
        } else {
            0
        }
    }
}
