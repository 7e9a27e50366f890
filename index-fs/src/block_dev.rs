//! # 块设备接口层
//!
//! 块设备是以**扇区**为单位存储数据的设备；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 设备读写是同步的，要么成功，要么以 [`DevError`] 失败。

use core::any::Any;

/// 设备I/O错误，不区分具体原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevError;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<(), DevError>;
    fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<(), DevError>;
}
