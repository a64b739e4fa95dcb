mod cli;
mod common;
mod config;
mod job;
mod parse;
mod rsh;
mod sh;
mod signal;
mod wait;

use nix::errno::Errno;
use std::process;

use cli::*;
use config::Config;
use rsh::Rsh;

fn main() {
    let config = Config::from_args();

    // Redirect stderr to stdout so a driver gets all output on one pipe.
    if unsafe { libc::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) } < 0 {
        println!("dup2: {}", Errno::last());
        process::exit(1);
    }
    config.init_logger();

    if let Err(e) = signal::install() {
        println!("{}", e);
        process::exit(1);
    }

    let mut client = Cli::new(Rsh::new(config.emit_prompt()));
    if let Err(e) = client.go() {
        println!("{}", e);
        process::exit(1);
    }
}
