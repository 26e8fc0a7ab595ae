//! Client message parsing.
//!
//! A client message is either a full command line (when no process is
//! running for the session) or a line of input for the running process.

/// A parsed command line.
///
/// The first token is the command name as the user typed it; it is replaced
/// by the configured binary when launching, so only `args` reach the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Split a message on whitespace. Returns `None` for a blank message.
    pub fn parse(message: &str) -> Option<Self> {
        let mut tokens = message.split_whitespace().map(str::to_string);
        let program = tokens.next()?;
        Some(Self {
            program,
            args: tokens.collect(),
        })
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Bytes written to a running process for one client message: the message
/// terminated by exactly one newline.
pub fn parse_input(message: &str) -> Vec<u8> {
    let mut bytes = message.as_bytes().to_vec();
    if !bytes.ends_with(b"\n") {
        bytes.push(b'\n');
    }
    bytes
}
