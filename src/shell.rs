//! The interactive line-based command shell.
//!
//! One line in, one round of output out: `handle_line` never panics on bad input, it prints
//! a diagnostic and returns so the caller can read the next line. `exit` is the only command
//! that asks the caller to stop the loop (the return value of `handle_line` says so).

use std::fs;
use std::io::{self, BufRead, Write};

use crate::error::Error;
use crate::fs::Filesystem;

/// Reads lines from stdin and feeds them to [`handle_line`] until `exit` or EOF.
///
/// Returns the process exit code.
pub fn run(fs: &mut Filesystem) -> i32 {
    let stdin = io::stdin();
    let mut out = io::stdout();
    loop {
        print!("Command (exit to quit): ");
        let _ = out.flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            return 0;
        }
        if !handle_line(line.trim(), fs, &mut out) {
            return 0;
        }
    }
}

/// Dispatches one already-trimmed command line against `fs`, writing its output to `out`.
///
/// Returns `false` if the caller should stop reading further lines (the `exit` command, or
/// an `exit` encountered while replaying a `load`ed script).
pub fn handle_line(line: &str, fs: &mut Filesystem, out: &mut impl Write) -> bool {
    let mut tokens = line.split_whitespace();
    let cmd = match tokens.next() {
        Some(c) => c,
        None => return true,
    };
    let args: Vec<&str> = tokens.collect();
    let keep_going = match cmd {
        "format" => with_args(out, &args, 1, |a| cmd_format(fs, a[0], out)),
        "incp" => with_args(out, &args, 2, |a| cmd_incp(fs, a[0], a[1], out)),
        "outcp" => with_args(out, &args, 2, |a| cmd_outcp(fs, a[0], a[1], out)),
        "pwd" => with_args(out, &args, 0, |_| cmd_pwd(fs, out)),
        "cd" => with_args(out, &args, 1, |a| cmd_cd(fs, a[0], out)),
        "ls" => with_args(out, &args, 1, |a| cmd_ls(fs, a[0], out)),
        "rm" => with_args(out, &args, 1, |a| cmd_rm(fs, a[0], out)),
        "cat" => with_args(out, &args, 1, |a| cmd_cat(fs, a[0], out)),
        "info" => with_args(out, &args, 1, |a| cmd_info(fs, a[0], out)),
        "mkdir" => with_args(out, &args, 1, |a| cmd_mkdir(fs, a[0], out)),
        "rmdir" => with_args(out, &args, 1, |a| cmd_rmdir(fs, a[0], out)),
        "cp" => with_args(out, &args, 2, |a| cmd_cp(fs, a[0], a[1], out)),
        "mv" => with_args(out, &args, 2, |a| cmd_mv(fs, a[0], a[1], out)),
        "load" => with_args(out, &args, 1, |a| cmd_load(fs, a[0], out)),
        "check" => with_args(out, &args, 0, |_| cmd_check(fs, out)),
        "exit" => return false,
        _ => {
            let _ = writeln!(out, "{cmd}: unknown command");
            true
        }
    };
    let _ = writeln!(out);
    keep_going
}

/// Checks `args` against `expected` and runs `f`, or prints a usage diagnostic. Either way
/// the shell keeps running — a bad line is never fatal.
fn with_args(out: &mut impl Write, args: &[&str], expected: usize, f: impl FnOnce(&[&str]) -> bool) -> bool {
    if args.len() != expected {
        let _ = writeln!(out, "wrong number of arguments: expected {expected}, got {}", args.len());
        return true;
    }
    f(args)
}

fn cmd_format(fs: &mut Filesystem, size_mb: &str, out: &mut impl Write) -> bool {
    let Ok(size_mb) = size_mb.parse::<u32>() else {
        let _ = writeln!(out, "CANNOT CREATE FILE");
        return true;
    };
    match fs.format(size_mb) {
        Ok(()) => {
            let _ = writeln!(out, "OK");
        }
        Err(_) => {
            let _ = writeln!(out, "CANNOT CREATE FILE");
        }
    }
    true
}

fn cmd_incp(fs: &mut Filesystem, host_path: &str, vfs_path: &str, out: &mut impl Write) -> bool {
    let bytes = match fs::read(host_path) {
        Ok(b) => b,
        Err(_) => {
            let _ = writeln!(out, "FILE NOT FOUND");
            return true;
        }
    };
    match fs.create_file(vfs_path, &bytes) {
        Ok(()) => {
            let _ = writeln!(out, "OK");
        }
        Err(Error::NotFound | Error::NotADirectory) => {
            let _ = writeln!(out, "PATH NOT FOUND");
        }
        Err(_) => {
            let _ = writeln!(out, "CANNOT CREATE FILE");
        }
    }
    true
}

fn cmd_outcp(fs: &mut Filesystem, vfs_path: &str, host_path: &str, out: &mut impl Write) -> bool {
    let bytes = match fs.cat(vfs_path) {
        Ok(b) => b,
        Err(Error::NotFound) => {
            let _ = writeln!(out, "FILE NOT FOUND");
            return true;
        }
        Err(_) => {
            let _ = writeln!(out, "PATH NOT FOUND");
            return true;
        }
    };
    match fs::write(host_path, bytes) {
        Ok(()) => {
            let _ = writeln!(out, "OK");
        }
        Err(_) => {
            let _ = writeln!(out, "CANNOT CREATE FILE");
        }
    }
    true
}

fn cmd_pwd(fs: &mut Filesystem, out: &mut impl Write) -> bool {
    let _ = writeln!(out, "{}", fs.pwd());
    true
}

fn cmd_cd(fs: &mut Filesystem, path: &str, out: &mut impl Write) -> bool {
    match fs.cd(path) {
        Ok(()) => {
            let _ = writeln!(out, "OK");
        }
        Err(_) => {
            let _ = writeln!(out, "PATH NOT FOUND");
        }
    }
    true
}

fn cmd_ls(fs: &mut Filesystem, path: &str, out: &mut impl Write) -> bool {
    match fs.ls(path) {
        Ok(entries) => {
            for entry in entries {
                let marker = if entry.is_dir { '+' } else { '-' };
                let _ = writeln!(out, "{marker}{}", entry.name);
            }
        }
        Err(_) => {
            let _ = writeln!(out, "PATH NOT FOUND");
        }
    }
    true
}

fn cmd_rm(fs: &mut Filesystem, path: &str, out: &mut impl Write) -> bool {
    match fs.remove_file(path) {
        Ok(()) => {
            let _ = writeln!(out, "OK");
        }
        Err(_) => {
            let _ = writeln!(out, "FILE NOT FOUND");
        }
    }
    true
}

fn cmd_cat(fs: &mut Filesystem, path: &str, out: &mut impl Write) -> bool {
    match fs.cat(path) {
        Ok(bytes) => {
            let _ = out.write_all(&bytes);
            let _ = writeln!(out);
        }
        Err(_) => {
            let _ = writeln!(out, "FILE NOT FOUND");
        }
    }
    true
}

fn cmd_info(fs: &mut Filesystem, path: &str, out: &mut impl Write) -> bool {
    match fs.stat(path) {
        Ok(stat) => {
            let kind = if stat.is_dir { "dir" } else { "file" };
            let _ = writeln!(out, "{} id={} kind={kind} size={}", stat.name, stat.id, stat.size);
        }
        Err(_) => {
            let _ = writeln!(out, "FILE NOT FOUND");
        }
    }
    true
}

fn cmd_mkdir(fs: &mut Filesystem, path: &str, out: &mut impl Write) -> bool {
    match fs.mkdir(path) {
        Ok(()) => {
            let _ = writeln!(out, "OK");
        }
        Err(Error::Exists) => {
            let _ = writeln!(out, "EXISTS");
        }
        Err(_) => {
            let _ = writeln!(out, "PATH NOT FOUND");
        }
    }
    true
}

fn cmd_rmdir(fs: &mut Filesystem, path: &str, out: &mut impl Write) -> bool {
    match fs.rmdir(path) {
        Ok(()) => {
            let _ = writeln!(out, "OK");
        }
        Err(Error::NotEmpty) => {
            let _ = writeln!(out, "NOT EMPTY");
        }
        Err(_) => {
            let _ = writeln!(out, "FILE NOT FOUND");
        }
    }
    true
}

fn cmd_cp(fs: &mut Filesystem, src: &str, dst: &str, out: &mut impl Write) -> bool {
    match fs.cp(src, dst) {
        Ok(()) => {
            let _ = writeln!(out, "OK");
        }
        Err(Error::NotFound) => {
            let _ = writeln!(out, "FILE NOT FOUND");
        }
        Err(_) => {
            let _ = writeln!(out, "PATH NOT FOUND");
        }
    }
    true
}

fn cmd_mv(fs: &mut Filesystem, src: &str, dst: &str, out: &mut impl Write) -> bool {
    match fs.mv(src, dst) {
        Ok(()) => {
            let _ = writeln!(out, "OK");
        }
        Err(Error::NotFound) => {
            let _ = writeln!(out, "FILE NOT FOUND");
        }
        Err(_) => {
            let _ = writeln!(out, "PATH NOT FOUND");
        }
    }
    true
}

/// Replays a host script file line by line through [`handle_line`].
///
/// Errors opening the script are reported to stderr and do not stop the parent shell; an
/// `exit` encountered inside the script stops both the script and the parent shell.
fn cmd_load(fs: &mut Filesystem, host_path: &str, out: &mut impl Write) -> bool {
    let file = match fs::File::open(host_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{host_path}: {e}");
            return true;
        }
    };
    for line in io::BufRead::lines(io::BufReader::new(file)) {
        let Ok(line) = line else { break };
        if !handle_line(line.trim(), fs, out) {
            return false;
        }
    }
    true
}

fn cmd_check(fs: &mut Filesystem, out: &mut impl Write) -> bool {
    match fs.check() {
        Ok(report) => {
            for (id, recorded, actual) in &report.size_mismatches {
                let _ = writeln!(out, "size mismatch: inode {id} recorded {recorded}, actual {actual}");
            }
            for id in &report.orphan_inodes {
                let _ = writeln!(out, "orphan inode: {id}");
            }
            let _ = writeln!(out, "CHECK COMPLETE");
        }
        Err(_) => {
            let _ = writeln!(out, "CHECK COMPLETE");
        }
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "pfs-shell-test-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ))
    }

    struct Guard(PathBuf);
    impl Drop for Guard {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn run_script(fs: &mut Filesystem, lines: &[&str]) -> String {
        let mut out = Vec::new();
        for line in lines {
            handle_line(line, fs, &mut out);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn format_pwd_ls_scenario() {
        let path = scratch_path("scenario1");
        let _guard = Guard(path.clone());
        let mut fs = Filesystem::mount(&path).unwrap();
        let transcript = run_script(&mut fs, &["format 1", "pwd", "ls /"]);
        assert!(transcript.contains("OK"));
        assert!(transcript.contains('/'));
        assert!(transcript.contains("+."));
        assert!(transcript.contains("+.."));
    }

    #[test]
    fn mkdir_cd_pwd_ls_scenario() {
        let path = scratch_path("scenario2");
        let _guard = Guard(path.clone());
        let mut fs = Filesystem::mount(&path).unwrap();
        let transcript = run_script(
            &mut fs,
            &["format 1", "mkdir /a", "mkdir /a/b", "cd /a/b", "pwd", "ls /a"],
        );
        assert!(transcript.contains("/a/b"));
        assert!(transcript.contains("+b"));
    }

    #[test]
    fn rmdir_nonempty_reports_not_empty() {
        let path = scratch_path("scenario5");
        let _guard = Guard(path.clone());
        let mut fs = Filesystem::mount(&path).unwrap();
        let mut out = Vec::new();
        handle_line("format 1", &mut fs, &mut out);
        handle_line("mkdir /d", &mut fs, &mut out);
        fs.create_file("/d/f", b"x").unwrap();
        out.clear();
        handle_line("rmdir /d", &mut fs, &mut out);
        assert!(String::from_utf8(out).unwrap().contains("NOT EMPTY"));
    }

    #[test]
    fn unknown_command_reports_and_continues() {
        let path = scratch_path("unknown");
        let _guard = Guard(path.clone());
        let mut fs = Filesystem::mount(&path).unwrap();
        let transcript = run_script(&mut fs, &["bogus", "format 1", "pwd"]);
        assert!(transcript.contains("unknown command"));
        assert!(transcript.contains('/'));
    }

    #[test]
    fn wrong_arg_count_reports_and_continues() {
        let path = scratch_path("wrongargs");
        let _guard = Guard(path.clone());
        let mut fs = Filesystem::mount(&path).unwrap();
        let transcript = run_script(&mut fs, &["mkdir", "format 1"]);
        assert!(transcript.contains("wrong number of arguments"));
        assert!(transcript.contains("OK"));
    }

    #[test]
    fn exit_stops_the_loop() {
        let path = scratch_path("exitstop");
        let _guard = Guard(path.clone());
        let mut fs = Filesystem::mount(&path).unwrap();
        let mut out = Vec::new();
        assert!(handle_line("format 1", &mut fs, &mut out));
        assert!(!handle_line("exit", &mut fs, &mut out));
    }

    #[test]
    fn check_reports_complete() {
        let path = scratch_path("checkcmd");
        let _guard = Guard(path.clone());
        let mut fs = Filesystem::mount(&path).unwrap();
        let transcript = run_script(&mut fs, &["format 1", "check"]);
        assert!(transcript.contains("CHECK COMPLETE"));
    }
}
