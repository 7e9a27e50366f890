//! 宿主机侧的配套设施：文件/内存块设备、空闲扇区表与时钟的实现，
//! 供测试与打包工具驱动 `index-fs`。

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;
use std::time::Instant;

use index_fs::{BlockDevice, Clock, DevError, FreeMap, SECTOR_SIZE};

/// 以宿主机普通文件为载体的块设备
pub struct BlockFile(pub Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<(), DevError> {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .map_err(|_| DevError)?;
        file.read_exact(buf).map_err(|_| DevError)
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<(), DevError> {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .map_err(|_| DevError)?;
        file.write_all(buf).map_err(|_| DevError)
    }
}

/// 驻留内存的块设备，可绕过缓存直接检视扇区内容
pub struct MemDisk(Mutex<Vec<u8>>);

impl MemDisk {
    pub fn new(sectors: usize) -> Self {
        Self(Mutex::new(vec![0; sectors * SECTOR_SIZE]))
    }

    /// 取出设备上一个扇区此刻的字节，不经过任何缓存
    pub fn snapshot(&self, sector: u32) -> Vec<u8> {
        let data = self.0.lock().unwrap();
        let start = sector as usize * SECTOR_SIZE;
        data[start..start + SECTOR_SIZE].to_vec()
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<(), DevError> {
        let data = self.0.lock().unwrap();
        let start = sector as usize * SECTOR_SIZE;
        if start + SECTOR_SIZE > data.len() {
            return Err(DevError);
        }
        buf.copy_from_slice(&data[start..start + SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<(), DevError> {
        let mut data = self.0.lock().unwrap();
        let start = sector as usize * SECTOR_SIZE;
        if start + SECTOR_SIZE > data.len() {
            return Err(DevError);
        }
        data[start..start + SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

/// 内存位图形态的空闲扇区表
pub struct MemFreeMap {
    /// 每个bit指示一个扇区，1为已分配
    bits: Mutex<Vec<u64>>,
    total: u32,
}

impl MemFreeMap {
    pub fn new(total: u32) -> Self {
        Self {
            bits: Mutex::new(vec![0; total.div_ceil(64) as usize]),
            total,
        }
    }

    pub fn free_count(&self) -> u32 {
        let bits = self.bits.lock().unwrap();
        self.total - bits.iter().map(|word| word.count_ones()).sum::<u32>()
    }

    pub fn is_free(&self, sector: u32) -> bool {
        let bits = self.bits.lock().unwrap();
        !Self::test(&bits, sector)
    }

    #[inline]
    fn test(bits: &[u64], sector: u32) -> bool {
        bits[sector as usize / 64] & (1 << (sector % 64)) != 0
    }
}

impl FreeMap for MemFreeMap {
    fn allocate(&self, count: u32) -> Option<u32> {
        assert!(count > 0);
        let mut bits = self.bits.lock().unwrap();

        // 首次适应：寻找连续count个空位
        let mut run = 0;
        for sector in 0..self.total {
            if Self::test(&bits, sector) {
                run = 0;
                continue;
            }
            run += 1;
            if run == count {
                let first = sector + 1 - count;
                for s in first..=sector {
                    bits[s as usize / 64] |= 1 << (s % 64);
                }
                return Some(first);
            }
        }

        None
    }

    fn release(&self, first: u32, count: u32) {
        let mut bits = self.bits.lock().unwrap();
        for sector in first..first + count {
            // 归还的扇区必须处于已分配状态
            assert!(Self::test(&bits, sector));
            bits[sector as usize / 64] &= !(1 << (sector % 64));
        }
    }
}

/// 以进程启动时刻为起点的毫秒时钟
pub struct SystemClock(Instant);

impl SystemClock {
    pub fn new() -> Self {
        Self(Instant::now())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn ticks(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }

    fn tick_rate(&self) -> u64 {
        1000
    }
}
