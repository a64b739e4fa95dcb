extern crate nix;

use nix::unistd::Pid;
use std::fmt;

use crate::common::*;

/// Max jobs at any point in time.
pub const MAXJOBS: usize = 16;
/// Max bytes of a command line kept for display.
pub const MAXLINE: usize = 1024;

/// Job states.
///
/// Transitions and what enables them:
///
/// ```text
///     Foreground -> Stopped    : ctrl-z
///     Background -> Stopped    : stop signal from elsewhere
///     Stopped    -> Foreground : fg
///     Stopped    -> Background : bg, or SIGCONT from elsewhere
///     Background -> Foreground : fg
/// ```
///
/// At most one job is ever in the `Foreground` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Foreground,
    Background,
    Stopped,
}

impl State {
    fn can_become(self, to: State) -> bool {
        use State::*;
        match (self, to) {
            (Foreground, Stopped) | (Background, Stopped) => true,
            (Stopped, Foreground) | (Stopped, Background) => true,
            (Background, Foreground) => true,
            // bg on a job that is already running just re-reports it
            (Background, Background) | (Stopped, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Foreground => "Foreground",
            State::Background => "Running",
            State::Stopped => "Stopped",
        })
    }
}

/// Command line stored inline so that clearing a slot never frees memory.
#[derive(Clone, Copy)]
pub struct CmdLine {
    buf: [u8; MAXLINE],
    len: usize,
}

impl CmdLine {
    pub fn new(s: &str) -> CmdLine {
        let mut len = s.len().min(MAXLINE);
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        let mut buf = [0u8; MAXLINE];
        buf[..len].copy_from_slice(&s.as_bytes()[..len]);
        CmdLine { buf, len }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }
}

impl fmt::Display for CmdLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for CmdLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl PartialEq for CmdLine {
    fn eq(&self, other: &CmdLine) -> bool {
        self.as_str() == other.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Job {
    pub pid: Pid,
    pub jid: usize,
    pub state: State,
    pub cmdline: CmdLine,
}

impl fmt::Display for Job {
    /// `[jid] (pid) state cmdline`, the `jobs` listing line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({}) {} {}", self.jid, self.pid, self.state, self.cmdline)
    }
}

/// Fixed set of job slots. A `None` slot is free.
///
/// Every method is a bounded scan over the slots with plain copies, so the
/// table may be touched from a signal handler as long as the main flow only
/// touches it with the job signals blocked.
pub struct JobTable {
    slots: [Option<Job>; MAXJOBS],
}

impl JobTable {
    pub const fn new() -> JobTable {
        JobTable {
            slots: [None; MAXJOBS],
        }
    }

    /// Registers `pid` under the smallest free job id and returns that id.
    pub fn add(&mut self, pid: Pid, state: State, cmdline: &str) -> Result<usize, ShellError> {
        if pid.as_raw() < 1 {
            return err(ShellError::NoSuchProcess(pid.as_raw()));
        }
        let jid = self.smallest_free_jid().ok_or(ShellError::TableFull)?;
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(ShellError::TableFull)?;
        *slot = Some(Job {
            pid,
            jid,
            state,
            cmdline: CmdLine::new(cmdline),
        });
        Ok(jid)
    }

    /// Frees the slot holding `pid`. Returns the removed job, if any.
    pub fn remove(&mut self, pid: Pid) -> Option<Job> {
        if pid.as_raw() < 1 {
            return None;
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(job) if job.pid == pid))?;
        slot.take()
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<&Job> {
        if pid.as_raw() < 1 {
            return None;
        }
        self.list().find(|job| job.pid == pid)
    }

    pub fn find_by_jid(&self, jid: usize) -> Option<&Job> {
        if jid < 1 {
            return None;
        }
        self.list().find(|job| job.jid == jid)
    }

    fn find_by_pid_mut(&mut self, pid: Pid) -> Option<&mut Job> {
        self.slots
            .iter_mut()
            .filter_map(Option::as_mut)
            .find(|job| job.pid == pid)
    }

    pub fn foreground(&self) -> Option<&Job> {
        self.list().find(|job| job.state == State::Foreground)
    }

    /// Occupied slots in slot order. Cloning the iterator restarts it.
    pub fn list(&self) -> impl Iterator<Item = &Job> + Clone {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Least job id in `1..=MAXJOBS` not held by any job.
    pub fn smallest_free_jid(&self) -> Option<usize> {
        let mut taken = [false; MAXJOBS + 1];
        for job in self.list() {
            if job.jid <= MAXJOBS {
                taken[job.jid] = true;
            }
        }
        (1..=MAXJOBS).find(|&jid| !taken[jid])
    }

    /// Moves the job owning `pid` to `to`, refusing moves the job-control
    /// state machine does not allow and a second foreground job.
    pub fn transition(&mut self, pid: Pid, to: State) -> Result<Job, ShellError> {
        let fg = self.foreground().map(|job| job.pid);
        let job = self
            .find_by_pid_mut(pid)
            .ok_or(ShellError::NoSuchProcess(pid.as_raw()))?;
        let busy = to == State::Foreground && fg.map_or(false, |fg| fg != pid);
        if busy || !job.state.can_become(to) {
            return err(ShellError::IllegalTransition {
                jid: job.jid,
                from: job.state,
                to,
            });
        }
        job.state = to;
        Ok(*job)
    }
}

#[cfg(test)]
impl JobTable {
    pub fn len(&self) -> usize {
        self.list().count()
    }

    pub fn is_empty(&self) -> bool {
        self.list().next().is_none()
    }
}

impl Default for JobTable {
    fn default() -> Self {
        JobTable::new()
    }
}
