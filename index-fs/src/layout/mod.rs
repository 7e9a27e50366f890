//! # 磁盘数据结构层
//!
//! 磁盘上的每条记录恰好占一个扇区，字段均为小端`u32`：
//! inode记录 | 间接索引块 | 二级间接索引块
//!
//! 记录只在读写的瞬间以栈上临时值存在，经由缓存层搬运，
//! 从不作为共享可变状态长期驻留。

mod indirect;
pub use indirect::{DblIndirectBlock, IndirectBlock};

mod inode;
pub use inode::{DiskInode, SectorBudget};
