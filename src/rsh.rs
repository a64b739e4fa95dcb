extern crate libc;
extern crate log;
extern crate nix;

use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{killpg, SigSet, Signal};
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::CString;
use std::io::{self, Write};

use crate::common::*;
use crate::job::State;
use crate::parse::Command;
use crate::sh::Shell;
use crate::signal::{self, JobsGuard};
use crate::wait;

#[derive(Debug)]
pub struct Rsh {
    emit_prompt: bool,
    prompt: String,
}

impl Default for Rsh {
    fn default() -> Self {
        Rsh {
            emit_prompt: true,
            prompt: "tsh> ".to_owned(),
        }
    }
}

/// Argument of `bg`/`fg`: `%jid` or a bare pid.
#[derive(Debug, PartialEq)]
enum Target {
    Job(usize),
    Process(Pid),
}

impl Target {
    fn parse(typ: &'static str, args: &[String]) -> Result<Target, ShellError> {
        let arg = args.first().ok_or(ShellError::MissingTarget(typ))?;
        match arg.strip_prefix('%') {
            Some(jid) => jid.parse().map(Target::Job),
            None => arg.parse().map(|pid| Target::Process(Pid::from_raw(pid))),
        }
        .map_err(|_| ShellError::BadTarget(typ))
    }
}

impl Shell for Rsh {
    fn prompt(&self) -> CliResult {
        if self.emit_prompt {
            print!("{}", self.prompt);
            io::stdout().flush()?;
        }
        ok("")
    }

    fn list_jobs(&self) -> CliResult {
        let guard = JobsGuard::acquire()?;
        let mut out = String::new();
        for job in guard.jobs().list() {
            out.push_str(&format!("{}\n", job));
        }
        Ok(out)
    }

    fn bg(&mut self, args: &[String]) -> CliResult {
        self.do_bgfg(args, State::Background)
    }

    fn fg(&mut self, args: &[String]) -> CliResult {
        self.do_bgfg(args, State::Foreground)
    }

    fn run(&mut self, cmd: &Command) -> CliResult {
        let argv = cmd
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()).map_err(|_| ShellError::Nul(arg.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let state = if cmd.background {
            State::Background
        } else {
            State::Foreground
        };
        // anything still buffered would be written again by the child
        io::stdout().flush()?;

        // SIGCHLD stays blocked until the job is in the table, so the
        // handler can never reap a child we have not registered yet.
        let mut guard = JobsGuard::acquire()?;
        let pid = match unsafe { unistd::fork() }.map_err(ShellError::Fork)? {
            ForkResult::Child => Rsh::exec(&argv, guard.saved_mask()),
            ForkResult::Parent { child } => child,
        };
        // set the group from this side too, so killpg works before the
        // child gets scheduled. EACCES means it already exec'd.
        match unistd::setpgid(pid, pid) {
            Ok(()) | Err(Errno::EACCES) | Err(Errno::ESRCH) => {}
            Err(e) => debug!("setpgid ({}): {}", pid, e),
        }
        let jid = guard.jobs_mut().add(pid, state, &cmd.line)?;
        drop(guard);
        debug!("Added job [{}] {} {}", jid, pid, cmd.line);

        if cmd.background {
            ok(format!("[{}] ({}) {}\n", jid, pid, cmd.line))
        } else {
            wait::wait_fg(pid)?;
            ok("")
        }
    }
}

impl Rsh {
    pub fn new(emit_prompt: bool) -> Rsh {
        Rsh {
            emit_prompt,
            ..Rsh::default()
        }
    }

    fn do_bgfg(&mut self, args: &[String], to: State) -> CliResult {
        let typ = if to == State::Foreground { "fg" } else { "bg" };
        let target = Target::parse(typ, args)?;
        let job = {
            let mut guard = JobsGuard::acquire()?;
            let jobs = guard.jobs_mut();
            let pid = match target {
                Target::Job(jid) => jobs.find_by_jid(jid).ok_or(ShellError::NoSuchJob(jid))?.pid,
                Target::Process(pid) => {
                    jobs.find_by_pid(pid)
                        .ok_or(ShellError::NoSuchProcess(pid.as_raw()))?
                        .pid
                }
            };
            killpg(pid, Signal::SIGCONT).map_err(|errno| ShellError::Signal {
                pid,
                signal: Signal::SIGCONT,
                errno,
            })?;
            jobs.transition(pid, to)?
        };

        if to == State::Foreground {
            wait::wait_fg(job.pid)?;
            ok("")
        } else {
            ok(format!("[{}] ({}) {}\n", job.jid, job.pid, job.cmdline))
        }
    }

    /// Runs in the child: own process group, shell signal state undone,
    /// then the program image. Never returns.
    fn exec(argv: &[CString], saved: &SigSet) -> ! {
        // new job belongs to its own process group
        if let Err(e) = unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
            Rsh::child_exit(&format!("setpgid: {}\n", e));
        }
        signal::restore_for_child(saved);

        let name = argv[0].to_string_lossy();
        let errno = match unistd::execvp(&argv[0], argv) {
            Ok(never) => match never {},
            Err(errno) => errno,
        };
        if errno == Errno::ENOENT {
            Rsh::child_exit(&format!("{}: Command not found\n", name));
        }
        Rsh::child_exit(&format!("{}: {}\n", name, errno))
    }

    fn child_exit(msg: &str) -> ! {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(msg.as_bytes());
        let _ = stdout.flush();
        unsafe { libc::_exit(1) }
    }
}
