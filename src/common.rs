extern crate nix;
extern crate thiserror;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::io;
use thiserror::Error;

use crate::job::State;

pub type CliResult = Result<String, ShellError>;

pub fn ok<T: ToString>(s: T) -> CliResult {
    Ok(s.to_string())
}

pub fn err<T>(e: ShellError) -> Result<T, ShellError> {
    Err(e)
}

/// Everything that can go wrong while evaluating one command line.
///
/// The `Display` text is exactly what the user sees.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Tried to create too many jobs")]
    TableFull,
    #[error("%{0}: No such job")]
    NoSuchJob(usize),
    #[error("({0}): No such process")]
    NoSuchProcess(i32),
    #[error("{0} command requires PID or %jobid argument")]
    MissingTarget(&'static str),
    #[error("{0}: argument must be a PID or %jobid")]
    BadTarget(&'static str),
    #[error("job [{jid}] cannot go from {from} to {to}")]
    IllegalTransition { jid: usize, from: State, to: State },
    #[error("fork: {0}")]
    Fork(#[source] Errno),
    #[error("sigprocmask: {0}")]
    Mask(#[source] Errno),
    #[error("sigaction: {0}")]
    Install(#[source] Errno),
    #[error("kill ({pid}, {signal:?}): {errno}")]
    Signal {
        pid: Pid,
        signal: Signal,
        #[source]
        errno: Errno,
    },
    #[error("{0}: argument contains a NUL byte")]
    Nul(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
