use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "battfs", author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub image: ImageArgs,

    /// Print flash operation totals on exit.
    #[arg(long, global = true)]
    pub stats: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Erase every page of the image, creating it if needed.
    Format,

    /// List the files on the image.
    Ls,

    /// Copy a file's contents to stdout.
    Cat(CatArgs),

    /// Write stdin (or `--input`) into a file, creating it if needed.
    Write(WriteArgs),

    /// Mount the image and report what the scan found.
    Scan,
}

#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    #[arg(long, env = "BATTFS_IMAGE")]
    pub image: PathBuf,

    #[arg(long, env = "BATTFS_PAGE_SIZE", default_value_t = 128)]
    pub page_size: usize,

    #[arg(long, env = "BATTFS_PAGE_COUNT", default_value_t = 256)]
    pub page_count: usize,
}

#[derive(Args)]
pub struct CatArgs {
    pub inode: u8,
}

#[derive(Args)]
pub struct WriteArgs {
    pub inode: u8,

    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Byte offset to start writing at; past the end leaves a zero-filled gap.
    #[arg(long, default_value_t = 0)]
    pub offset: u64,
}
