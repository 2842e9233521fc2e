mod cli;
mod stats;

use std::io::{Read, SeekFrom, Write};

use anyhow::{Context, Result};
use battfs::device::FileFlash;
use battfs::{BattFs, FlashDevice, Geometry, OpenMode};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{CatArgs, Cli, Command, ImageArgs, WriteArgs};
use crate::stats::CountingSink;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let sink = cli.stats.then(CountingSink::install);

    match &cli.command {
        Command::Format => format(&cli.image)?,
        Command::Ls => ls(&cli.image)?,
        Command::Cat(args) => cat(&cli.image, args)?,
        Command::Write(args) => write(&cli.image, args)?,
        Command::Scan => scan(&cli.image)?,
    }

    if let Some(sink) = sink {
        eprintln!("flash ops: {}", sink.summary());
    }
    Ok(())
}

fn open_image(args: &ImageArgs) -> Result<FileFlash> {
    let geom = Geometry::new(args.page_size, args.page_count);
    geom.validate().context("invalid geometry")?;
    FileFlash::open_prealloc(&args.image, geom)
        .with_context(|| format!("open image {}", args.image.display()))
}

fn mount(args: &ImageArgs) -> Result<BattFs<FileFlash>> {
    let flash = open_image(args)?;
    BattFs::mount(flash).with_context(|| format!("mount {}", args.image.display()))
}

fn format(args: &ImageArgs) -> Result<()> {
    let mut flash = open_image(args)?;
    if !flash.freshly_erased {
        flash.format().context("erase image")?;
    }
    flash.close().context("close image")?;
    info!(
        image = %args.image.display(),
        page_size = args.page_size,
        page_count = args.page_count,
        "image formatted"
    );
    Ok(())
}

fn ls(args: &ImageArgs) -> Result<()> {
    let mut fs = mount(args)?;
    println!("{:>5} {:>5} {:>10}", "INODE", "PAGES", "BYTES");
    for inode in 0..=u8::MAX {
        if !fs.file_exists(inode)? {
            continue;
        }
        let h = fs.file_open(inode, OpenMode::RD)?;
        let file = fs.file(h)?;
        println!("{:>5} {:>5} {:>10}", inode, file.pages(), file.size());
        fs.file_close(h)?;
    }
    fs.unmount()?;
    Ok(())
}

fn cat(args: &ImageArgs, cat: &CatArgs) -> Result<()> {
    let mut fs = mount(args)?;
    let h = fs
        .file_open(cat.inode, OpenMode::RD)
        .with_context(|| format!("open inode {}", cat.inode))?;

    let mut out = std::io::stdout().lock();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = fs.read(h, &mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    out.flush()?;

    fs.file_close(h)?;
    fs.unmount()?;
    Ok(())
}

fn write(args: &ImageArgs, write: &WriteArgs) -> Result<()> {
    let data = match &write.input {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("read input {}", path.display()))?
        }
        None => {
            let mut data = Vec::new();
            std::io::stdin().read_to_end(&mut data).context("read stdin")?;
            data
        }
    };

    let mut fs = mount(args)?;
    let h = fs
        .file_open(write.inode, OpenMode::CREATE | OpenMode::WR)
        .with_context(|| format!("open inode {}", write.inode))?;
    fs.seek(h, SeekFrom::Start(write.offset))?;
    let written = fs.write(h, &data)?;
    let size = fs.file_size(h)?;
    fs.file_close(h)?;
    let free = fs.free_bytes();
    fs.unmount()?;

    if written < data.len() {
        warn!(written, requested = data.len(), "disk full, write truncated");
        anyhow::bail!("disk full: wrote {written} of {} bytes", data.len());
    }
    info!(inode = write.inode, written, size, free_bytes = free, "write complete");
    Ok(())
}

fn scan(args: &ImageArgs) -> Result<()> {
    let fs = mount(args)?;
    let stats = fs.scan_stats().clone();
    let used = fs.free_page_start();
    let total = fs.page_array().len();

    println!("pages:      {used} used / {total} total");
    println!("free bytes: {} of {}", fs.free_bytes(), fs.disk_size());
    println!("valid:      {}", stats.valid);
    println!("evicted:    {}", stats.evicted);
    println!("truncated:  {}", stats.truncated);

    fs.unmount()?;
    Ok(())
}
