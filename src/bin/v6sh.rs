//! `v6sh`: an interactive line-oriented shell over a mounted image.
//!
//! Commands follow `original_source/terminal.py`'s set (`ls`, `mkdir`,
//! `fdelete`, ...), renamed to their more familiar shell equivalents
//! per `SPEC_FULL.md` §5.3 (`ls`, `cat`, `write`, `mkdir`, `rm`, `ln`,
//! `mv`, `truncate`, `stat`, `df`, `touch`, `exit`). Line reading uses
//! the same `cli::prompt` helper `mkv6fs` uses for its confirmation
//! prompt.

use std::env;
use std::fs::OpenOptions;
use std::process::exit;

use v6fs::cli::{error, prompt};
use v6fs::{Error, FileKind, Filesystem};

fn print_help() {
    println!("commands:");
    println!("  ls <path>              list a directory's entries");
    println!("  cat <path>             print a file's contents");
    println!("  write <path> <text>    overwrite a file with text (appends a trailing newline)");
    println!("  mkdir <path>           create a directory");
    println!("  touch <path>           create an empty file");
    println!("  rm <path>              remove a file or directory (recursively)");
    println!("  ln <src> <dst>         add a new name for an existing file");
    println!("  mv <src> <dst>         rename/move a file or directory");
    println!("  truncate <path> <n>    grow or shrink a file to n bytes");
    println!("  stat <path>            print a path's attributes");
    println!("  df                     print filesystem-wide space/inode usage");
    println!("  help                   print this message");
    println!("  exit                   unmount and quit");
}

fn resolve(cwd: &str, arg: &str) -> String {
    if arg.starts_with('/') {
        arg.to_string()
    } else if cwd == "/" {
        format!("/{arg}")
    } else {
        format!("{cwd}/{arg}")
    }
}

fn describe_error(e: &Error) -> String {
    e.to_string()
}

fn run(fs: &mut Filesystem, cwd: &str, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return true;
    };
    let rest: Vec<&str> = parts.collect();

    match cmd {
        "exit" | "quit" | "unmount" => return false,
        "help" => print_help(),
        "ls" => {
            let path = rest.first().map(|p| resolve(cwd, p)).unwrap_or_else(|| cwd.to_string());
            match fs.dir_list(&path) {
                Ok(mut names) => {
                    names.sort();
                    for name in names {
                        println!("{name}");
                    }
                }
                Err(e) => println!("ls: {path}: {}", describe_error(&e)),
            }
        }
        "cat" => {
            let Some(p) = rest.first() else {
                println!("usage: cat <path>");
                return true;
            };
            let path = resolve(cwd, p);
            match fs.read_file(&path, 0, -1) {
                Ok(data) => {
                    use std::io::Write;
                    let _ = std::io::stdout().write_all(&data);
                    println!();
                }
                Err(e) => println!("cat: {path}: {}", describe_error(&e)),
            }
        }
        "write" => {
            if rest.len() < 2 {
                println!("usage: write <path> <text...>");
                return true;
            }
            let path = resolve(cwd, rest[0]);
            let text = format!("{}\n", rest[1..].join(" "));
            if !matches!(fs.exists(&path), Ok(true)) {
                if let Err(e) = fs.create(&path, FileKind::Regular) {
                    println!("write: {path}: {}", describe_error(&e));
                    return true;
                }
            }
            if let Err(e) = fs.truncate(&path, 0) {
                println!("write: {path}: {}", describe_error(&e));
                return true;
            }
            if let Err(e) = fs.write_file(&path, 0, text.as_bytes()) {
                println!("write: {path}: {}", describe_error(&e));
            }
        }
        "touch" => {
            let Some(p) = rest.first() else {
                println!("usage: touch <path>");
                return true;
            };
            let path = resolve(cwd, p);
            if let Err(e) = fs.create(&path, FileKind::Regular) {
                println!("touch: {path}: {}", describe_error(&e));
            }
        }
        "mkdir" => {
            let Some(p) = rest.first() else {
                println!("usage: mkdir <path>");
                return true;
            };
            let path = resolve(cwd, p);
            if let Err(e) = fs.create(&path, FileKind::Directory) {
                println!("mkdir: {path}: {}", describe_error(&e));
            }
        }
        "rm" => {
            let Some(p) = rest.first() else {
                println!("usage: rm <path>");
                return true;
            };
            let path = resolve(cwd, p);
            if let Err(e) = fs.unlink(&path) {
                println!("rm: {path}: {}", describe_error(&e));
            }
        }
        "ln" => {
            if rest.len() != 2 {
                println!("usage: ln <src> <dst>");
                return true;
            }
            let src = resolve(cwd, rest[0]);
            let dst = resolve(cwd, rest[1]);
            if let Err(e) = fs.link(&src, &dst) {
                println!("ln: {}", describe_error(&e));
            }
        }
        "mv" => {
            if rest.len() != 2 {
                println!("usage: mv <src> <dst>");
                return true;
            }
            let src = resolve(cwd, rest[0]);
            let dst = resolve(cwd, rest[1]);
            if let Err(e) = fs.rename(&src, &dst) {
                println!("mv: {}", describe_error(&e));
            }
        }
        "truncate" => {
            if rest.len() != 2 {
                println!("usage: truncate <path> <n>");
                return true;
            }
            let path = resolve(cwd, rest[0]);
            match rest[1].parse::<u32>() {
                Ok(n) => {
                    if let Err(e) = fs.truncate(&path, n) {
                        println!("truncate: {path}: {}", describe_error(&e));
                    }
                }
                Err(_) => println!("truncate: {}: not a number", rest[1]),
            }
        }
        "stat" => {
            let Some(p) = rest.first() else {
                println!("usage: stat <path>");
                return true;
            };
            let path = resolve(cwd, p);
            match fs.get_attr(&path) {
                Ok(s) => {
                    println!("  File: {path}");
                    println!("  Inode: {}  Links: {}  Size: {} bytes", s.ino, s.nlink, s.size);
                    println!("  Mode: {:#o}  Uid: {}  Gid: {}", s.mode, s.uid, s.gid);
                    println!("  Modify: {}  Access: {}", s.mtime, s.atime);
                }
                Err(e) => println!("stat: {path}: {}", describe_error(&e)),
            }
        }
        "df" => {
            let s = fs.get_stats();
            println!("blocks: {} total, {} free", s.blocks, s.bfree);
            println!("inodes: {} total, {} free", s.files, s.ffree);
        }
        _ => println!("unknown command: {cmd} (try 'help')"),
    }
    true
}

fn main() {
    let mut iter = env::args();
    let prog = iter.next().unwrap_or_else(|| "v6sh".to_string());
    let Some(image) = iter.next() else {
        eprintln!("Usage: {prog} <image>");
        exit(1);
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&image)
        .unwrap_or_else(|e| error(&prog, format!("{image}: {e}")));
    let mut fs = Filesystem::mount(file).unwrap_or_else(|e| error(&prog, e));

    println!("UNIX V6++ filesystem shell — {image} (type 'help' for commands)");
    let cwd = "/".to_string();
    loop {
        let Some(line) = prompt(format!("v6sh {cwd} $ "), false) else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        if !run(&mut fs, &cwd, line.trim()) {
            break;
        }
    }

    if let Err(e) = fs.unmount() {
        error(&prog, e);
    }
}
