use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A named command to be fork+execed: program and arguments, extra
/// environment bindings, and a working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
}

impl Command {
    fn new(name: &str) -> Command {
        Command {
            name: name.to_owned(),
            argv: Vec::new(),
            env: Vec::new(),
            cwd: "/".to_owned(),
        }
    }

    /// A command can only run if it has a program to exec.
    pub fn valid(&self) -> bool {
        !self.argv.is_empty()
    }

    fn exec(&mut self, val: &str) {
        self.argv = val.split_whitespace().map(str::to_owned).collect();
    }

    fn arg(&mut self, val: &str) {
        self.argv.push(val.to_owned());
    }

    fn env(&mut self, key: &str, val: &str) {
        self.env.push(format!("{}={}", key, val));
    }
}

/// Canonical config-file rendering; reparsing it reproduces the command.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.argv.is_empty() {
            writeln!(f, "{}.exec = {}", self.name, self.argv.join(" "))?;
        }
        if self.cwd != "/" {
            writeln!(f, "{}.cwd = {}", self.name, self.cwd)?;
        }
        for binding in &self.env {
            let mut kv = binding.splitn(2, '=');
            let key = kv.next().unwrap_or("");
            let val = kv.next().unwrap_or("");
            writeln!(f, "{}.{} = {}", self.name, key, val)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("cannot open {path} for reading: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config line {line}: '{text}'")]
    Malformed { line: usize, text: String },
    #[error("the schedule contains no valid commands")]
    Empty,
}

/// The static list of processes ("programs" or "commands") we aim to
/// maintain, in configuration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    v: Vec<Command>,
}

impl Schedule {
    pub fn load(path: &Path) -> Result<Schedule, ScheduleError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScheduleError::Open {
            path: path.to_owned(),
            source,
        })?;
        Schedule::parse(&text)
    }

    /// Parse config text. Lines are `NAME.KEY = VALUE`; `#` starts a
    /// comment; blank lines are skipped. `exec` replaces the argv, `arg`
    /// appends one element, `cwd` sets the working directory, and any
    /// other key becomes an environment binding. Lines sharing a NAME
    /// accumulate into one command while they are adjacent.
    pub fn parse(text: &str) -> Result<Schedule, ScheduleError> {
        let mut v: Vec<Command> = Vec::new();

        for (n, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("");
            if line.trim().is_empty() {
                continue;
            }
            let malformed = || ScheduleError::Malformed {
                line: n + 1,
                text: raw.to_owned(),
            };

            let mut halves = line.splitn(2, '=');
            let key = halves.next().unwrap_or("").trim();
            let val = halves.next().ok_or_else(malformed)?.trim();

            let mut dotted = key.splitn(2, '.');
            let name = dotted.next().unwrap_or("").trim();
            let param = dotted.next().ok_or_else(malformed)?.trim();
            if name.is_empty() || param.is_empty() {
                return Err(malformed());
            }

            let cmd = entry(&mut v, name);
            match param {
                "exec" => cmd.exec(val),
                "arg" => cmd.arg(val),
                "cwd" => cmd.cwd = val.to_owned(),
                other => cmd.env(other, val),
            }
        }

        if !v.iter().any(Command::valid) {
            return Err(ScheduleError::Empty);
        }
        Ok(Schedule { v })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.v.iter()
    }

    /// Resolution is by first match, so a duplicated name shadows later
    /// entries.
    pub fn find(&self, name: &str) -> Option<&Command> {
        self.v.iter().find(|cmd| cmd.name == name)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for cmd in &self.v {
            cmd.fmt(f)?;
        }
        Ok(())
    }
}

/// Append an entry `name`, or reuse the last entry if that is its name.
fn entry<'a>(v: &'a mut Vec<Command>, name: &str) -> &'a mut Command {
    if v.last().map(|cmd| cmd.name != name).unwrap_or(true) {
        v.push(Command::new(name));
    }
    v.last_mut().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_command() {
        let schedule = Schedule::parse("a.exec = /bin/sleep 100\n").unwrap();
        let a = schedule.find("a").unwrap();
        assert_eq!(a.argv, vec!["/bin/sleep", "100"]);
        assert_eq!(a.cwd, "/");
        assert!(a.env.is_empty());
        assert!(a.valid());
    }

    #[test]
    fn comments_and_blank_lines() {
        let text = "# a schedule\n\
                    \n\
                    a.exec = /bin/true   # trailing comment\n\
                    \t \n";
        let schedule = Schedule::parse(text).unwrap();
        assert_eq!(schedule.iter().count(), 1);
        assert_eq!(schedule.find("a").unwrap().argv, vec!["/bin/true"]);
    }

    #[test]
    fn adjacent_lines_accumulate() {
        let text = "a.exec = /bin/echo\n\
                    a.arg = hello world\n\
                    a.cwd = /tmp\n\
                    a.HOME = /nonexistent\n\
                    a.LANG = C\n";
        let schedule = Schedule::parse(text).unwrap();
        let a = schedule.find("a").unwrap();
        assert_eq!(a.argv, vec!["/bin/echo", "hello world"]);
        assert_eq!(a.cwd, "/tmp");
        assert_eq!(a.env, vec!["HOME=/nonexistent", "LANG=C"]);
    }

    #[test]
    fn exec_replaces_earlier_argv() {
        let text = "a.exec = /bin/foo x\n\
                    a.exec = /bin/bar\n";
        let schedule = Schedule::parse(text).unwrap();
        assert_eq!(schedule.find("a").unwrap().argv, vec!["/bin/bar"]);
    }

    #[test]
    fn nonadjacent_same_name_makes_two_commands() {
        let text = "a.exec = /bin/one\n\
                    b.exec = /bin/two\n\
                    a.exec = /bin/three\n";
        let schedule = Schedule::parse(text).unwrap();
        let names: Vec<&str> = schedule.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "a"]);
        // first match wins
        assert_eq!(schedule.find("a").unwrap().argv, vec!["/bin/one"]);
    }

    #[test]
    fn malformed_lines_are_rejected() {
        for text in [
            "just words\n",
            "noequals.exec\n",
            "nodot = value\n",
            ".exec = /bin/true\n",
            "a. = value\n",
        ] {
            match Schedule::parse(text) {
                Err(ScheduleError::Malformed { line: 1, .. }) => (),
                other => panic!("{:?} for {:?}", other.map(|_| ()), text),
            }
        }
    }

    #[test]
    fn schedule_without_valid_commands_is_an_error() {
        assert!(matches!(Schedule::parse(""), Err(ScheduleError::Empty)));
        // env-only command has no argv
        assert!(matches!(
            Schedule::parse("a.HOME = /\n"),
            Err(ScheduleError::Empty)
        ));
    }

    #[test]
    fn one_valid_command_carries_invalid_ones() {
        let text = "a.HOME = /\n\
                    b.exec = /bin/true\n";
        let schedule = Schedule::parse(text).unwrap();
        assert!(!schedule.find("a").unwrap().valid());
        assert!(schedule.find("b").unwrap().valid());
    }

    #[test]
    fn canonical_form_is_a_fixed_point() {
        let text = "a.exec = /bin/echo hello\n\
                    a.cwd = /tmp\n\
                    a.TERM = dumb\n\
                    b.exec = /bin/true\n";
        let schedule = Schedule::parse(text).unwrap();
        let canonical = schedule.to_string();
        let again = Schedule::parse(&canonical).unwrap();
        assert_eq!(canonical, again.to_string());
    }
}
