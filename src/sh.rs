use crate::common::*;
use crate::parse::Command;

/// What the built-in commands and the dispatcher can ask of a shell.
pub trait Shell {
    fn prompt(&self) -> CliResult;
    fn list_jobs(&self) -> CliResult;
    fn bg(&mut self, args: &[String]) -> CliResult;
    fn fg(&mut self, args: &[String]) -> CliResult;
    /// Launch an external program as a new job.
    fn run(&mut self, cmd: &Command) -> CliResult;
}
