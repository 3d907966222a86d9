//! Key sources for the batch commands.
//!
//! Keys come from the command line, or from stdin when the only argument is
//! `-`. Stdin is read lazily so workers can start on the first key while the
//! rest is still being piped in.

use std::io::{self, BufRead};

/// Argument that switches a command to reading keys from stdin.
pub const STDIN_MARKER: &str = "-";

/// Keys from `args`, or one key per stdin line when `args == ["-"]`.
pub fn keys_from_args(args: Vec<String>) -> Box<dyn Iterator<Item = String>> {
    if reads_stdin(&args) {
        Box::new(KeyLines::new(io::stdin().lock()))
    } else {
        Box::new(args.into_iter())
    }
}

pub fn reads_stdin(args: &[String]) -> bool {
    matches!(args, [only] if only == STDIN_MARKER)
}

/// Trimmed, non-blank lines of a reader.
///
/// A read error ends the stream; it is logged, not returned, since the
/// consumer is a worker queue with nowhere to route it.
pub struct KeyLines<R> {
    reader: R,
    buf: String,
    done: bool,
}

impl<R: BufRead> KeyLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for KeyLines<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    let key = self.buf.trim();
                    if !key.is_empty() {
                        return Some(key.to_string());
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stopped reading keys");
                    self.done = true;
                }
            }
        }
        None
    }
}
