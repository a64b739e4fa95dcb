extern crate libc;
extern crate nix;

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::cell::UnsafeCell;
use std::convert::TryFrom;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::*;
use crate::job::{JobTable, State};

/// Notices that can wait for the main flow before new ones are dropped.
pub const MAXNOTICES: usize = 64;

/// Signals whose handlers touch the job table. Blocking these is the lock.
const JOB_SIGNALS: [Signal; 3] = [Signal::SIGCHLD, Signal::SIGINT, Signal::SIGTSTP];

/// Something a handler observed that the main flow has to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Stopped { jid: usize, pid: Pid, signal: Signal },
    Terminated { jid: usize, pid: Pid, signal: Signal },
    Exited { jid: usize, pid: Pid, status: i32 },
    ForwardFailed { pid: Pid, signal: Signal, errno: Errno },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Notice::Stopped { jid, pid, signal } => {
                write!(f, "Job [{}] ({}) stopped by signal {}", jid, pid, signal as i32)
            }
            Notice::Terminated { jid, pid, signal } => {
                write!(f, "Job [{}] ({}) terminated by signal {}", jid, pid, signal as i32)
            }
            Notice::Exited { jid, pid, status } => {
                write!(f, "Job [{}] ({}) exited with status {}", jid, pid, status)
            }
            Notice::ForwardFailed { pid, signal, errno } => {
                write!(f, "{}", ShellError::Signal { pid, signal, errno })
            }
        }
    }
}

/// Allocation-free ring of notices, filled by handlers, drained by the main flow.
pub struct NoticeQueue {
    ring: [Option<Notice>; MAXNOTICES],
    head: usize,
    len: usize,
    dropped: usize,
}

impl NoticeQueue {
    pub const fn new() -> NoticeQueue {
        NoticeQueue {
            ring: [None; MAXNOTICES],
            head: 0,
            len: 0,
            dropped: 0,
        }
    }

    pub fn push(&mut self, notice: Notice) {
        if self.len == MAXNOTICES {
            self.dropped += 1;
            return;
        }
        self.ring[(self.head + self.len) % MAXNOTICES] = Some(notice);
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<Notice> {
        if self.len == 0 {
            return None;
        }
        let notice = self.ring[self.head].take();
        self.head = (self.head + 1) % MAXNOTICES;
        self.len -= 1;
        notice
    }

    /// Number of notices lost to a full ring since the last call.
    pub fn take_dropped(&mut self) -> usize {
        std::mem::replace(&mut self.dropped, 0)
    }
}

struct SignalCell<T>(UnsafeCell<T>);

// Access is serialised by the signal mask, see `JobsGuard`.
unsafe impl<T> Sync for SignalCell<T> {}

static JOBS: SignalCell<JobTable> = SignalCell(UnsafeCell::new(JobTable::new()));
static NOTICES: SignalCell<NoticeQueue> = SignalCell(UnsafeCell::new(NoticeQueue::new()));
/// Set by the SIGCHLD handler whenever a child changed state, cleared by the waiter.
static READY: AtomicBool = AtomicBool::new(false);
static HELD: AtomicBool = AtomicBool::new(false);

fn job_signals() -> SigSet {
    let mut set = SigSet::empty();
    for &sig in JOB_SIGNALS.iter() {
        set.add(sig);
    }
    set
}

/// Scoped "defer job signals" section.
///
/// While a guard is alive SIGCHLD, SIGINT and SIGTSTP are blocked on this
/// thread, so no handler can run and the job table and notice queue belong
/// to the holder. Dropping the guard restores the previous mask on every
/// exit path.
pub struct JobsGuard {
    saved: SigSet,
    // signal masks are per thread
    _thread: PhantomData<*const ()>,
}

impl JobsGuard {
    pub fn acquire() -> Result<JobsGuard, ShellError> {
        let mut saved = SigSet::empty();
        signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&job_signals()), Some(&mut saved))
            .map_err(ShellError::Mask)?;
        let nested = HELD.swap(true, Ordering::SeqCst);
        debug_assert!(!nested, "job table guard acquired twice");
        Ok(JobsGuard {
            saved,
            _thread: PhantomData,
        })
    }

    pub fn jobs(&self) -> &JobTable {
        unsafe { &*JOBS.0.get() }
    }

    pub fn jobs_mut(&mut self) -> &mut JobTable {
        unsafe { &mut *JOBS.0.get() }
    }

    pub fn notices_mut(&mut self) -> &mut NoticeQueue {
        unsafe { &mut *NOTICES.0.get() }
    }

    /// Mask that was in effect before the guard was taken.
    pub fn saved_mask(&self) -> &SigSet {
        &self.saved
    }

    /// Clears the readiness flag, returning whether it was set.
    pub fn take_ready(&mut self) -> bool {
        READY.swap(false, Ordering::SeqCst)
    }

    /// Unblocks the job signals and sleeps until a handler has run, in one
    /// atomic step. The job signals are blocked again on return.
    pub fn suspend(&mut self) {
        let mut mask = self.saved.clone();
        for &sig in JOB_SIGNALS.iter() {
            mask.remove(sig);
        }
        // always returns -1/EINTR once a handler ran
        unsafe { libc::sigsuspend(mask.as_ref()) };
    }
}

impl Drop for JobsGuard {
    fn drop(&mut self) {
        HELD.store(false, Ordering::SeqCst);
        let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.saved), None);
    }
}

/// Takes every pending notice, plus the count of notices lost since the
/// last drain.
pub fn drain_notices() -> Result<(Vec<Notice>, usize), ShellError> {
    let mut guard = JobsGuard::acquire()?;
    let queue = guard.notices_mut();
    let dropped = queue.take_dropped();
    let notices = std::iter::from_fn(|| queue.pop()).collect();
    Ok((notices, dropped))
}

/// Applies one `waitpid` result to the job table.
///
/// Only plain slot writes and ring pushes happen here; it runs in the
/// SIGCHLD handler.
pub fn record(jobs: &mut JobTable, notices: &mut NoticeQueue, status: WaitStatus) {
    match status {
        WaitStatus::Stopped(pid, signal) => {
            if let Ok(job) = jobs.transition(pid, State::Stopped) {
                notices.push(Notice::Stopped {
                    jid: job.jid,
                    pid,
                    signal,
                });
            }
        }
        WaitStatus::Signaled(pid, signal, _) => {
            if let Some(job) = jobs.remove(pid) {
                notices.push(Notice::Terminated {
                    jid: job.jid,
                    pid,
                    signal,
                });
            }
        }
        WaitStatus::Exited(pid, status) => {
            if let Some(job) = jobs.remove(pid) {
                notices.push(Notice::Exited {
                    jid: job.jid,
                    pid,
                    status,
                });
            }
        }
        WaitStatus::Continued(pid) => {
            let stopped = jobs
                .find_by_pid(pid)
                .map_or(false, |job| job.state == State::Stopped);
            if stopped {
                let _ = jobs.transition(pid, State::Background);
            }
        }
        _ => {}
    }
}

/// The kernel sends SIGCHLD whenever a child terminates, stops or
/// continues. Reap every child that changed state, never waiting for one
/// that has not.
extern "C" fn handle_sigchld(_: libc::c_int) {
    // SAFETY: the main flow only holds references into these cells while a
    // `JobsGuard` blocks this signal, and the other job signals are in this
    // handler's sa_mask.
    let (jobs, notices) = unsafe { (&mut *JOBS.0.get(), &mut *NOTICES.0.get()) };
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match wait::waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => {
                record(jobs, notices, status);
                READY.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// SIGINT (ctrl-c) and SIGTSTP (ctrl-z) go to the whole process group of
/// the foreground job, if there is one.
extern "C" fn handle_keyboard(signo: libc::c_int) {
    let sig = match Signal::try_from(signo) {
        Ok(sig) => sig,
        Err(_) => return,
    };
    // SAFETY: see handle_sigchld.
    let (jobs, notices) = unsafe { (&*JOBS.0.get(), &mut *NOTICES.0.get()) };
    let pid = match jobs.foreground() {
        Some(job) => job.pid,
        None => return,
    };
    if let Err(errno) = signal::killpg(pid, sig) {
        notices.push(Notice::ForwardFailed {
            pid,
            signal: sig,
            errno,
        });
    }
}

/// A driver can terminate the shell cleanly with SIGQUIT.
extern "C" fn handle_sigquit(_: libc::c_int) {
    const MSG: &[u8] = b"Terminating after receipt of SIGQUIT signal\n";
    unsafe {
        libc::write(
            libc::STDOUT_FILENO,
            MSG.as_ptr() as *const libc::c_void,
            MSG.len(),
        );
        libc::_exit(1);
    }
}

pub fn install() -> Result<(), ShellError> {
    let routes: [(Signal, extern "C" fn(libc::c_int)); 4] = [
        (Signal::SIGCHLD, handle_sigchld),
        (Signal::SIGINT, handle_keyboard),
        (Signal::SIGTSTP, handle_keyboard),
        (Signal::SIGQUIT, handle_sigquit),
    ];
    for &(sig, handler) in routes.iter() {
        let action = SigAction::new(SigHandler::Handler(handler), SaFlags::SA_RESTART, job_signals());
        unsafe { signal::sigaction(sig, &action) }.map_err(ShellError::Install)?;
    }
    Ok(())
}

/// Puts a freshly forked child back to the signal disposition the shell
/// started with. Called between fork and exec.
pub fn restore_for_child(saved: &SigSet) {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for &sig in [Signal::SIGCHLD, Signal::SIGINT, Signal::SIGTSTP, Signal::SIGQUIT].iter() {
        let _ = unsafe { signal::sigaction(sig, &default) };
    }
    let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(saved), None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    fn drain(notices: &mut NoticeQueue) -> Vec<Notice> {
        std::iter::from_fn(|| notices.pop()).collect()
    }

    #[test]
    fn stop_marks_job_and_reports() {
        let mut jobs = JobTable::new();
        let mut notices = NoticeQueue::new();
        jobs.add(pid(40), State::Foreground, "sleep 20").unwrap();
        record(&mut jobs, &mut notices, WaitStatus::Stopped(pid(40), Signal::SIGTSTP));
        assert_eq!(jobs.find_by_pid(pid(40)).unwrap().state, State::Stopped);
        assert!(jobs.foreground().is_none());
        let reported = drain(&mut notices);
        assert_eq!(
            reported,
            vec![Notice::Stopped {
                jid: 1,
                pid: pid(40),
                signal: Signal::SIGTSTP
            }]
        );
        assert_eq!(
            reported[0].to_string(),
            format!("Job [1] (40) stopped by signal {}", Signal::SIGTSTP as i32)
        );
    }

    #[test]
    fn signal_death_removes_and_reports() {
        let mut jobs = JobTable::new();
        let mut notices = NoticeQueue::new();
        jobs.add(pid(50), State::Foreground, "sleep 5").unwrap();
        record(
            &mut jobs,
            &mut notices,
            WaitStatus::Signaled(pid(50), Signal::SIGINT, false),
        );
        assert!(jobs.is_empty());
        let reported = drain(&mut notices);
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].to_string(), "Job [1] (50) terminated by signal 2");
    }

    #[test]
    fn normal_exit_removes_quietly() {
        let mut jobs = JobTable::new();
        let mut notices = NoticeQueue::new();
        jobs.add(pid(60), State::Background, "true &").unwrap();
        record(&mut jobs, &mut notices, WaitStatus::Exited(pid(60), 0));
        assert!(jobs.is_empty());
        assert!(matches!(drain(&mut notices)[..], [Notice::Exited { jid: 1, status: 0, .. }]));
    }

    #[test]
    fn second_reap_leaves_other_jobs_alone() {
        let mut jobs = JobTable::new();
        let mut notices = NoticeQueue::new();
        jobs.add(pid(70), State::Background, "a &").unwrap();
        jobs.add(pid(71), State::Background, "b &").unwrap();
        record(&mut jobs, &mut notices, WaitStatus::Exited(pid(70), 0));
        record(&mut jobs, &mut notices, WaitStatus::Exited(pid(70), 0));
        record(
            &mut jobs,
            &mut notices,
            WaitStatus::Signaled(pid(70), Signal::SIGKILL, false),
        );
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs.find_by_jid(2).unwrap().pid, pid(71));
        assert_eq!(drain(&mut notices).len(), 1);
    }

    #[test]
    fn unregistered_children_are_silent() {
        let mut jobs = JobTable::new();
        let mut notices = NoticeQueue::new();
        record(&mut jobs, &mut notices, WaitStatus::Exited(pid(99), 1));
        record(&mut jobs, &mut notices, WaitStatus::Stopped(pid(99), Signal::SIGTSTP));
        assert!(notices.pop().is_none());
    }

    #[test]
    fn outside_sigcont_resumes_stopped_job_in_background() {
        let mut jobs = JobTable::new();
        let mut notices = NoticeQueue::new();
        jobs.add(pid(80), State::Stopped, "vi").unwrap();
        jobs.add(pid(81), State::Foreground, "sleep 9").unwrap();
        record(&mut jobs, &mut notices, WaitStatus::Continued(pid(80)));
        record(&mut jobs, &mut notices, WaitStatus::Continued(pid(81)));
        assert_eq!(jobs.find_by_pid(pid(80)).unwrap().state, State::Background);
        assert_eq!(jobs.find_by_pid(pid(81)).unwrap().state, State::Foreground);
    }

    #[test]
    fn notice_ring_is_fifo_and_counts_overflow() {
        let mut notices = NoticeQueue::new();
        for n in 0..MAXNOTICES + 3 {
            notices.push(Notice::Exited {
                jid: 1,
                pid: pid(n as i32 + 1),
                status: 0,
            });
        }
        assert_eq!(notices.take_dropped(), 3);
        assert_eq!(notices.take_dropped(), 0);
        let pids: Vec<i32> = drain(&mut notices)
            .into_iter()
            .map(|notice| match notice {
                Notice::Exited { pid, .. } => pid.as_raw(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(pids, (1..=MAXNOTICES as i32).collect::<Vec<_>>());
        notices.push(Notice::Exited {
            jid: 2,
            pid: pid(500),
            status: 3,
        });
        assert!(matches!(notices.pop(), Some(Notice::Exited { status: 3, .. })));
    }

    #[test]
    fn forward_failure_reads_like_a_kill_error() {
        let notice = Notice::ForwardFailed {
            pid: pid(90),
            signal: Signal::SIGINT,
            errno: Errno::ESRCH,
        };
        assert_eq!(
            notice.to_string(),
            format!("kill (90, SIGINT): {}", Errno::ESRCH)
        );
    }

    #[test]
    fn guard_blocks_job_signals_until_dropped() {
        let before = SigSet::thread_get_mask().unwrap();
        {
            let _guard = JobsGuard::acquire().unwrap();
            let masked = SigSet::thread_get_mask().unwrap();
            for &sig in JOB_SIGNALS.iter() {
                assert!(masked.contains(sig));
            }
        }
        let after = SigSet::thread_get_mask().unwrap();
        for &sig in JOB_SIGNALS.iter() {
            assert_eq!(before.contains(sig), after.contains(sig));
        }
    }
}
