extern crate clap;
extern crate env_logger;
extern crate log;

use clap::Parser;
use log::LevelFilter;
use std::ffi::OsString;
use std::io::Write;
use std::process;

/// Command-line options. `-h` and anything unrecognised print the usage.
#[derive(Parser, Debug, Default, PartialEq)]
#[command(name = "tsh", disable_help_flag = true, disable_version_flag = true)]
pub struct Config {
    /// print this message
    #[arg(short = 'h')]
    pub help: bool,
    /// print additional diagnostic information
    #[arg(short = 'v')]
    pub verbose: bool,
    /// do not emit a command prompt
    #[arg(short = 'p')]
    pub no_prompt: bool,
}

impl Config {
    pub fn from_args() -> Config {
        Config::parse_args(std::env::args_os())
    }

    pub fn parse_args<I, T>(args: I) -> Config
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match Config::try_parse_from(args) {
            Ok(config) if !config.help => config,
            _ => usage(),
        }
    }

    pub fn emit_prompt(&self) -> bool {
        !self.no_prompt
    }

    /// Diagnostics go to stdout as bare lines; `-v` turns on debug output,
    /// otherwise `RUST_LOG` decides and the default is warnings only.
    pub fn init_logger(&self) {
        let mut builder = env_logger::Builder::new();
        builder
            .filter_level(LevelFilter::Warn)
            .parse_default_env()
            .target(env_logger::Target::Stdout)
            .format(|buf, record| writeln!(buf, "{}", record.args()));
        if self.verbose {
            builder.filter_level(LevelFilter::Debug);
        }
        let _ = builder.try_init();
    }
}

/// Print a help message and terminate.
pub fn usage() -> ! {
    println!("Usage: shell [-hvp]");
    println!("   -h   print this message");
    println!("   -v   print additional diagnostic information");
    println!("   -p   do not emit a command prompt");
    process::exit(1);
}
