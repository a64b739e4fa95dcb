extern crate log;

use log::{debug, warn};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::process;

use crate::common::*;
use crate::parse::parse_line;
use crate::rsh::Rsh;
use crate::sh::Shell;
use crate::signal::{self, Notice};

pub struct Cli<'a> {
    sh: Rsh,
    builtins: HashMap<String, Box<dyn Fn(&mut dyn Shell, &[String]) -> CliResult + 'a>>,
}

impl<'a> Cli<'a> {
    pub fn new(sh: Rsh) -> Cli<'a> {
        let mut cli = Cli {
            sh,
            builtins: HashMap::new(),
        };
        // register builtins
        {
            cli.builtin("quit", |_, _| {
                io::stdout().flush()?;
                process::exit(0)
            });
            cli.builtin("jobs", |sh, _| sh.list_jobs());
            cli.builtin("bg", |sh, args| sh.bg(args));
            cli.builtin("fg", |sh, args| sh.fg(args));
        }
        cli
    }

    fn builtin<F>(&mut self, name: &str, builtin: F)
    where
        F: Fn(&mut dyn Shell, &[String]) -> CliResult + 'a,
    {
        self.builtins.insert(name.to_owned(), Box::new(builtin));
    }

    fn dispatch(&mut self, line: &str) -> CliResult {
        let cmd = match parse_line(line) {
            Some(cmd) => cmd,
            None => return ok(""),
        };
        match self.builtins.get(&cmd.argv[0]) {
            Some(f) => f(&mut self.sh, &cmd.argv[1..]),
            None => self.sh.run(&cmd),
        }
    }

    /// Prints what the signal handlers queued up since the last call.
    fn report(&self) {
        let (notices, dropped) = match signal::drain_notices() {
            Ok(drained) => drained,
            Err(e) => {
                println!("{}", e);
                return;
            }
        };
        for notice in notices {
            match notice {
                Notice::Exited { .. } => debug!("{}", notice),
                _ => println!("{}", notice),
            }
        }
        if dropped > 0 {
            warn!("{} job notices were lost", dropped);
        }
    }

    /// The read/eval loop. Returns at end of input.
    pub fn go(&mut self) -> Result<(), ShellError> {
        let stdin = io::stdin();
        let mut buf = Vec::new();
        loop {
            self.report();
            if let Err(e) = self.sh.prompt() {
                println!("{}", e);
            }

            buf.clear();
            if stdin.lock().read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            match self.dispatch(&line) {
                Ok(o) => print!("{}", o),
                Err(e) => println!("{}", e),
            };
            self.report();
            io::stdout().flush()?;
        }
        io::stdout().flush()?;
        Ok(())
    }
}
