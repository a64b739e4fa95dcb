extern crate nix;

use nix::unistd::Pid;

use crate::common::*;
use crate::job::State;
use crate::signal::JobsGuard;

/// Block until process `pid` is no longer the foreground job, either
/// because it was reaped or because it stopped.
///
/// Sleeps in `sigsuspend` with the job signals blocked around every check,
/// so a SIGCHLD arriving between the check and the sleep still wakes us.
pub fn wait_fg(pid: Pid) -> Result<(), ShellError> {
    let mut guard = JobsGuard::acquire()?;
    while in_foreground(&guard, pid) {
        while !guard.take_ready() {
            guard.suspend();
        }
    }
    Ok(())
}

fn in_foreground(guard: &JobsGuard, pid: Pid) -> bool {
    guard
        .jobs()
        .find_by_pid(pid)
        .map_or(false, |job| job.state == State::Foreground)
}
