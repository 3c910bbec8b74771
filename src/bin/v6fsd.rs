//! `v6fsd`: the FUSE host adapter. Translates kernel filesystem
//! callbacks into calls against a mounted [`v6fs::Filesystem`],
//! serialized onto a single thread (spec.md §5's concurrency model:
//! only the owning thread invokes core operations, the equivalent of
//! the Python reference's `nothreads=True` FUSE session).
//!
//! Grounded on the `fuser`-based bridges in the pack
//! (`KINGFIOX-hitsz-ext2-fuse`, `realchonk-fuse-ufs`) for the
//! `Filesystem` trait shape, and on `original_source/mount.py` for
//! which calls map to which core operation. Not part of the core: this
//! binary is an external collaborator per spec.md §1.

use std::collections::HashMap;
use std::env;
use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem as FuseFilesystem, MountOption, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
};
use libc::{EEXIST, EFBIG, EINVAL, EIO, ENOENT, ENOSPC, ENOTDIR, EISDIR};
use log::{debug, warn};

use v6fs::cli::error as cli_error;
use v6fs::{Error, FileKind, FileStats, Filesystem};

const TTL: Duration = Duration::from_secs(1);

fn errno(e: &Error) -> i32 {
    match e {
        Error::NotFound => ENOENT,
        Error::AlreadyExists => EEXIST,
        Error::InvalidName => EINVAL,
        Error::NoSpace | Error::NoInode => ENOSPC,
        Error::FileTooLarge => EFBIG,
        Error::NotAFile => EISDIR,
        Error::NotADirectory => ENOTDIR,
        Error::Io(_) | Error::Corruption(_) => EIO,
    }
}

fn to_file_attr(stats: &FileStats) -> FileAttr {
    let kind = match stats.mode as u32 & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => FileType::Directory,
        m if m == libc::S_IFCHR as u32 => FileType::CharDevice,
        m if m == libc::S_IFBLK as u32 => FileType::BlockDevice,
        _ => FileType::RegularFile,
    };
    let time = |secs: u32| UNIX_EPOCH + Duration::from_secs(secs as u64);
    FileAttr {
        ino: stats.ino as u64,
        size: stats.size as u64,
        blocks: (stats.size as u64).div_ceil(512),
        atime: time(stats.atime),
        mtime: time(stats.mtime),
        ctime: time(stats.ctime),
        crtime: time(stats.mtime),
        kind,
        perm: (stats.mode & 0o777) as u16,
        nlink: stats.nlink,
        uid: stats.uid as u32,
        gid: stats.gid as u32,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

/// Translates FUSE's (parent inode, child name) addressing into the
/// core's path-based addressing, by remembering every inode number
/// it has handed out alongside the path that produced it.
struct V6Fsd {
    fs: Filesystem,
    paths: HashMap<u64, PathBuf>,
}

impl V6Fsd {
    fn new(fs: Filesystem) -> Self {
        let mut paths = HashMap::new();
        paths.insert(1, PathBuf::from("/"));
        Self { fs, paths }
    }

    fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.paths.get(&ino).cloned()
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        let parent_path = self.path_of(parent)?;
        let name = name.to_str()?;
        Some(if parent_path == Path::new("/") {
            PathBuf::from(format!("/{name}"))
        } else {
            PathBuf::from(format!("{}/{name}", parent_path.display()))
        })
    }

    fn remember(&mut self, ino: u64, path: PathBuf) {
        self.paths.insert(ino, path);
    }

    /// Flushes the core after a mutating callback, so a crash between
    /// requests loses at most the in-flight one rather than everything
    /// back to the last clean unmount.
    fn flush(&mut self) {
        if let Err(e) = self.fs.flush() {
            warn!("flush after mutation failed: {e}");
        }
    }
}

impl FuseFilesystem for V6Fsd {
    /// Flushes the core to the image before the session tears down.
    /// Without this, the `BlockCache` (no `Drop` impl, per spec.md
    /// §4.1's explicit-flush contract) is simply dropped when
    /// `fuser::mount2` returns, losing every dirty block — the only
    /// other path that flushes is `v6sh`'s explicit `fs.unmount()`.
    fn destroy(&mut self) {
        if let Err(e) = self.fs.flush() {
            warn!("flush on unmount failed: {e}");
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.get_attr(path.to_string_lossy().as_ref()) {
            Ok(stats) => {
                self.remember(stats.ino as u64, path);
                reply.entry(&TTL, &to_file_attr(&stats), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.get_attr(path.to_string_lossy().as_ref()) {
            Ok(stats) => reply.attr(&TTL, &to_file_attr(&stats)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        let path_str = path.to_string_lossy().into_owned();
        if let Some(n) = size {
            if let Err(e) = self.fs.truncate(&path_str, n as u32) {
                reply.error(errno(&e));
                return;
            }
            self.flush();
        }
        match self.fs.get_attr(&path_str) {
            Ok(stats) => reply.attr(&TTL, &to_file_attr(&stats)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.create(path.to_string_lossy().as_ref(), FileKind::Directory) {
            Ok(_) => {
                self.flush();
                match self.fs.get_attr(path.to_string_lossy().as_ref()) {
                    Ok(stats) => {
                        self.remember(stats.ino as u64, path);
                        reply.entry(&TTL, &to_file_attr(&stats), 0);
                    }
                    Err(e) => reply.error(errno(&e)),
                }
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.create(path.to_string_lossy().as_ref(), FileKind::Regular) {
            Ok(_) => {
                self.flush();
                match self.fs.get_attr(path.to_string_lossy().as_ref()) {
                    Ok(stats) => {
                        self.remember(stats.ino as u64, path);
                        reply.created(&TTL, &to_file_attr(&stats), 0, 0, 0);
                    }
                    Err(e) => reply.error(errno(&e)),
                }
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.unlink(path.to_string_lossy().as_ref()) {
            Ok(()) => {
                self.flush();
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.unlink(req, parent, name, reply);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(src), Some(dst)) = (self.child_path(parent, name), self.child_path(newparent, newname)) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.rename(&src.to_string_lossy(), &dst.to_string_lossy()) {
            Ok(()) => {
                self.flush();
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let (Some(src), Some(dst)) = (self.path_of(ino), self.child_path(newparent, newname)) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.link(&src.to_string_lossy(), &dst.to_string_lossy()) {
            Ok(()) => {
                self.flush();
                match self.fs.get_attr(&dst.to_string_lossy()) {
                    Ok(stats) => {
                        self.remember(stats.ino as u64, dst);
                        reply.entry(&TTL, &to_file_attr(&stats), 0);
                    }
                    Err(e) => reply.error(errno(&e)),
                }
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.read_file(&path.to_string_lossy(), offset, size as i64) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.write_file(&path.to_string_lossy(), offset, data) {
            Ok(()) => {
                self.flush();
                reply.written(data.len() as u32);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        let names = match self.fs.dir_list(&path.to_string_lossy()) {
            Ok(n) => n,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };
        let mut entries = vec![(ino, FileType::Directory, ".".to_string()), (ino, FileType::Directory, "..".to_string())];
        for name in names {
            let child = if path == Path::new("/") {
                PathBuf::from(format!("/{name}"))
            } else {
                PathBuf::from(format!("{}/{name}", path.display()))
            };
            let Ok(stats) = self.fs.get_attr(&child.to_string_lossy()) else {
                continue;
            };
            self.remember(stats.ino as u64, child);
            let kind = if stats.mode as u32 & libc::S_IFMT as u32 == libc::S_IFDIR as u32 {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push((stats.ino as u64, kind, name));
        }
        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stats = self.fs.get_stats();
        reply.statfs(
            stats.blocks,
            stats.bfree,
            stats.bavail,
            stats.files,
            stats.ffree,
            stats.bsize,
            stats.namemax,
            0,
        );
    }
}

fn print_usage(prog: &str) {
    eprintln!("Usage: {prog} <image> <mountpoint> [--debug] [--foreground]");
}

fn main() {
    let mut iter = env::args();
    let prog = iter.next().unwrap_or_else(|| "v6fsd".to_string());

    let mut image = None;
    let mut mountpoint = None;
    let mut debug_flag = false;
    let mut foreground = false;
    for arg in iter {
        match arg.as_str() {
            "--debug" => debug_flag = true,
            "--foreground" => foreground = true,
            "-h" | "--help" => {
                print_usage(&prog);
                exit(0);
            }
            _ if image.is_none() => image = Some(arg),
            _ if mountpoint.is_none() => mountpoint = Some(arg),
            _ => {
                print_usage(&prog);
                exit(1);
            }
        }
    }

    if debug_flag {
        unsafe {
            env::set_var("RUST_LOG", "debug");
        }
    }
    env_logger::init();

    let (Some(image), Some(mountpoint)) = (image, mountpoint) else {
        print_usage(&prog);
        exit(1);
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&image)
        .unwrap_or_else(|e| cli_error(&prog, format!("{image}: {e}")));
    let core = Filesystem::mount(file).unwrap_or_else(|e| cli_error(&prog, e));
    debug!("mounted {image}, serving at {mountpoint}");

    let options = vec![
        MountOption::FSName("v6fs".to_string()),
        MountOption::AutoUnmount,
    ];
    if !foreground {
        warn!("backgrounding is left to the caller; running in the foreground");
    }
    if let Err(e) = fuser::mount2(V6Fsd::new(core), &mountpoint, &options) {
        cli_error(&prog, e);
    }
}
