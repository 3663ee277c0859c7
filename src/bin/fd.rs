#![deny(unsafe_code)]

use mimalloc::MiMalloc;

/// High-performance memory allocator for the long-running distributor.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[path = "daemon.rs"]
mod daemon;

use std::{env, io, process::ExitCode};

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    daemon::run_with(env::args_os(), &mut stdout, &mut stderr)
}
