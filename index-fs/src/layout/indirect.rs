//! 间接索引块
//! - 一级：块内连续存储**扇区号**，每个编号指向一个**数据扇区**
//! - 二级：块内连续存储**扇区号**，每个编号指向一个一级索引块
//!
//! 头部三个字加上 [`INDIRECT_COUNT`] 个编号，恰好填满一个扇区。

use core::mem;
use core::ptr;
use core::slice;

use crate::{INDIRECT_COUNT, SECTOR_SIZE};

/// 一级间接索引块
#[derive(Clone)]
#[repr(C)]
pub struct IndirectBlock {
    /// 本记录所在的扇区号
    pub this: u32,
    /// 所属inode的扇区号
    pub parent: u32,
    /// 已使用的编号数
    pub used: u32,
    /// 数据扇区的编号
    pub blocks: [u32; INDIRECT_COUNT],
}

/// 二级间接索引块，形状与一级相同，编号指向一级索引块
#[derive(Clone)]
#[repr(C)]
pub struct DblIndirectBlock {
    pub this: u32,
    pub parent: u32,
    /// 已使用的一级索引块数
    pub used: u32,
    /// 一级索引块的编号
    pub indirect: [u32; INDIRECT_COUNT],
}

const _: () = assert!(mem::size_of::<IndirectBlock>() == SECTOR_SIZE);
const _: () = assert!(mem::size_of::<DblIndirectBlock>() == SECTOR_SIZE);

impl IndirectBlock {
    pub fn new(this: u32, parent: u32) -> Self {
        Self {
            this,
            parent,
            used: 0,
            blocks: [0; INDIRECT_COUNT],
        }
    }

    #[inline]
    pub fn zeroed() -> Self {
        Self::new(0, 0)
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

impl DblIndirectBlock {
    pub fn new(this: u32, parent: u32) -> Self {
        Self {
            this,
            parent,
            used: 0,
            indirect: [0; INDIRECT_COUNT],
        }
    }

    #[inline]
    pub fn zeroed() -> Self {
        Self::new(0, 0)
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
