mod cli;

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::sync::Arc;
use std::sync::Mutex;

use clap::Parser;
use cli::Cli;
use index_fs::FreeMap;
use index_fs::IndexFileSystem;
use index_fs::SECTOR_SIZE;
use index_fs_fuse::{BlockFile, MemFreeMap, SystemClock};

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let block_file = Arc::new(BlockFile(Mutex::new({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&cli.image)?;
        fd.set_len(cli.sectors as u64 * SECTOR_SIZE as u64)?;

        fd
    })));

    let free_map = Arc::new(MemFreeMap::new(cli.sectors));
    let fs = IndexFileSystem::new(block_file, free_map.clone());
    fs.attach_flush_timer(Box::new(SystemClock::new()));

    for path in &cli.files {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        let sector = free_map.allocate(1).expect("image ran out of sectors");
        fs.create(sector, data.len() as u32)
            .expect("inode creation failed");

        let inode = IndexFileSystem::open(&fs, sector).expect("fresh inode must open");
        assert_eq!(data.len(), inode.write_at(0, &data));
        inode.close();

        log::info!("packed {} bytes from {}", data.len(), path.display());
        println!("{} -> sector {sector}", path.display());

        fs.poll_flush().expect("periodic flush failed");
    }

    fs.flush().expect("final flush failed");

    Ok(())
}
