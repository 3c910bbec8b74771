//! `mkv6fs` formats a disk image as a fresh V6++ filesystem.
//!
//! Argument parsing and the already-present confirmation flow follow
//! `mkfs/src/main.rs`'s `parse_args`/`prompt` idiom, simplified to the
//! single filesystem type this crate implements.

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::exit;

use v6fs::accessor::ObjectAccessor;
use v6fs::cache::BlockCache;
use v6fs::cli::{error, prompt};
use v6fs::device::BlockDevice;
use v6fs::format_image;
use v6fs::layout::{BLOCK_SIZE, SB_MAGIC, SUPERBLOCK_BLOCKS};

const DEFAULT_INODE_BLOCKS: u64 = 64;

#[derive(Default)]
struct Args {
    image: Option<PathBuf>,
    blocks: Option<u64>,
    inode_blocks: Option<u64>,
    help: bool,
}

fn print_usage(prog: &str) {
    eprintln!("Usage: {prog} <image> [--blocks N] [--inodes N]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --blocks N   total block count for a new image (required if it doesn't exist)");
    eprintln!("  --inodes N   inode-region block count (default {DEFAULT_INODE_BLOCKS})");
    eprintln!("  -h, --help   print this message");
}

fn parse_args(mut iter: impl Iterator<Item = String>) -> Args {
    let mut args = Args::default();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => args.help = true,
            "--blocks" => {
                let n = iter.next().unwrap_or_else(|| error("mkv6fs", "--blocks needs a value"));
                args.blocks = Some(n.parse().unwrap_or_else(|_| error("mkv6fs", "--blocks must be a number")));
            }
            "--inodes" => {
                let n = iter.next().unwrap_or_else(|| error("mkv6fs", "--inodes needs a value"));
                args.inode_blocks =
                    Some(n.parse().unwrap_or_else(|_| error("mkv6fs", "--inodes must be a number")));
            }
            _ => args.image = Some(PathBuf::from(arg)),
        }
    }
    args
}

/// Whether `path` already carries a V6++ superblock (trailer magic matches).
fn is_present(path: &PathBuf) -> bool {
    let Ok(file) = OpenOptions::new().read(true).open(path) else {
        return false;
    };
    let Ok(len) = file.metadata().map(|m| m.len()) else {
        return false;
    };
    if len < SUPERBLOCK_BLOCKS * BLOCK_SIZE as u64 || len % BLOCK_SIZE as u64 != 0 {
        return false;
    }
    let Ok(device) = BlockDevice::open(file) else {
        return false;
    };
    let cache = BlockCache::new(device, 4);
    let Ok(mut accessor) = ObjectAccessor::open(cache) else {
        return false;
    };
    accessor
        .get_superblock()
        .map(|sb| sb.magic == SB_MAGIC)
        .unwrap_or(false)
}

fn main() {
    let mut iter = env::args();
    let prog = iter.next().unwrap_or_else(|| "mkv6fs".to_string());
    let args = parse_args(iter);

    if args.help {
        print_usage(&prog);
        exit(0);
    }
    let image = args.image.unwrap_or_else(|| {
        print_usage(&prog);
        exit(1);
    });

    if image.exists() && is_present(&image) {
        println!("{} already contains a V6++ filesystem", image.display());
        let confirm = prompt("Proceed anyway and overwrite it? (y/N) ", false)
            .map(|s| s.to_lowercase() == "y")
            .unwrap_or(false);
        if !confirm {
            eprintln!("Abort.");
            exit(1);
        }
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&image)
        .unwrap_or_else(|e| error(&prog, format!("{}: {e}", image.display())));

    let total_blocks = match args.blocks {
        Some(n) => n,
        None => {
            let len = file.metadata().unwrap_or_else(|e| error(&prog, e)).len();
            if len == 0 {
                error(&prog, "new image needs --blocks N");
            }
            len / BLOCK_SIZE as u64
        }
    };
    file.set_len(total_blocks * BLOCK_SIZE as u64)
        .unwrap_or_else(|e| error(&prog, e));

    let inode_blocks = args.inode_blocks.unwrap_or(DEFAULT_INODE_BLOCKS);
    format_image(&file, inode_blocks).unwrap_or_else(|e| error(&prog, e));
    println!(
        "{}: formatted {total_blocks} blocks ({inode_blocks} inode blocks)",
        image.display()
    );
}
