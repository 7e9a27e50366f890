use clap::Parser;
use std::path::PathBuf;

/// 建立镜像，并把宿主机文件逐个装入其中的新inode
#[derive(Parser)]
pub struct Cli {
    /// Output image path
    #[arg(long, short)]
    pub image: PathBuf,

    /// Image size in sectors
    #[arg(long, short, default_value_t = 32768)]
    pub sectors: u32,

    /// Files to pack
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}
