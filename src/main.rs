//! CLI entry point: `pfs <backing-file>` mounts (or implicitly leaves unformatted) the
//! backing file and hands off to the interactive shell.

use std::env;
use std::process::exit;

use pfs::fs::Filesystem;
use pfs::shell;

fn main() {
    let mut args = env::args_os();
    let _bin = args.next();
    let backing_path = match (args.next(), args.next()) {
        (Some(path), None) => path,
        _ => {
            eprintln!("usage: pfs <backing-file>");
            exit(-1);
        }
    };

    let mut fs = match Filesystem::mount(&backing_path) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("{}: {e}", backing_path.to_string_lossy());
            exit(-1);
        }
    };

    exit(shell::run(&mut fs));
}
