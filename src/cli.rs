//! Small CLI support shared by the three binaries (`mkv6fs`, `v6fsd`,
//! `v6sh`): a termios-based line prompt and an error-then-exit helper.
//! Ported from the teacher's `utils::prompt::prompt` and
//! `utils::error`, folded into this crate rather than pulled in via a
//! separate workspace member, since this crate is a single package.

use std::process::exit;
use std::{fmt, io};

use libc::{ECHO, ECHOE, ICANON, STDIN_FILENO, TCSANOW, VMIN, tcgetattr, tcsetattr, termios};
use std::io::{BufRead, Write};
use std::mem::MaybeUninit;

/// Shows a prompt and returns the line typed in response, or `None` on EOF.
pub fn prompt<P: fmt::Display>(prompt: P, hidden: bool) -> Option<String> {
    let saved_termios = unsafe {
        let mut t: termios = MaybeUninit::zeroed().assume_init();
        tcgetattr(STDIN_FILENO, &mut t);
        t
    };
    if hidden {
        let mut termios = saved_termios;
        termios.c_lflag &= !(ICANON | ECHO | ECHOE);
        termios.c_cc[VMIN] = 1;
        unsafe {
            tcsetattr(STDIN_FILENO, TCSANOW, &termios);
        }
    }
    print!("{prompt}");
    let _ = io::stdout().flush();
    let input = io::stdin().lock().lines().next()?.unwrap_or_default();
    if hidden {
        println!();
        unsafe {
            tcsetattr(STDIN_FILENO, TCSANOW, &saved_termios);
        }
    }
    Some(input)
}

/// Writes `{bin}: error: {msg}` to stderr, then exits with status 1.
pub fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}
