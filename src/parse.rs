/// One parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// The line as typed, without its line terminator.
    pub line: String,
    pub argv: Vec<String>,
    pub background: bool,
}

/// Splits `line` into arguments.
///
/// Arguments are separated by blanks; text between a pair of single quotes
/// is one argument even if it contains blanks. A trailing standalone `&`
/// marks the job for the background and is not part of `argv`. Returns
/// `None` for a line with no arguments.
pub fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
    let mut argv = Vec::new();
    let mut rest = line.trim_start_matches(is_blank);
    while !rest.is_empty() {
        let (arg, tail) = if let Some(quoted) = rest.strip_prefix('\'') {
            match quoted.find('\'') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match rest.find(is_blank) {
                Some(end) => (&rest[..end], &rest[end..]),
                None => (rest, ""),
            }
        };
        argv.push(arg.to_owned());
        rest = tail.trim_start_matches(is_blank);
    }

    let background = argv.last().map_or(false, |arg| arg == "&");
    if background {
        argv.pop();
    }
    if argv.is_empty() {
        return None;
    }
    Some(Command {
        line: line.to_owned(),
        argv,
        background,
    })
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}
