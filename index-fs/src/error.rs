use crate::block_dev::DevError;

/// 文件存储核心的错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 读取越过文件末尾，或扇区上没有合法inode
    NotFound,
    /// 请求的逻辑大小超出索引树的编号范围
    TooLarge,
    /// 空闲扇区表无法满足分配
    OutOfSpace,
    /// 设备读写失败
    Io,
    /// 缓存槽或临时索引块记录分配失败
    OutOfMemory,
}

pub type Result<T> = core::result::Result<T, FsError>;

impl From<DevError> for FsError {
    #[inline]
    fn from(_: DevError) -> Self {
        Self::Io
    }
}
