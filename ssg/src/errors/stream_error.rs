use std::error::Error;
use std::fmt;

use crate::reply::ErrorKind;

/// Host-side streaming failures. Everything the driver can hit is a value
/// here; the wire `code=` tokens stay in [`ErrorKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Driver configuration failed validation.
    Config(String),
    /// WebSocket handshake failed.
    Connect(String),
    FailedToSend(String),
    FailedToReceive(String),
    /// The controller closed the connection mid-stream.
    Disconnected,
    /// A job line did not carry a parseable `N<seq>` token.
    MalformedJob { index: usize, line: String },
    /// The controller rejected a command and the code is fatal for the job.
    Rejected { seq: u32, code: ErrorKind },
    /// An asynchronous controller fault (heartbeat, endstop, limit).
    Fault(ErrorKind),
    /// A line went unacknowledged through every allowed retry.
    RetriesExhausted { seq: u32 },
    /// No status reply arrived for a resume query.
    StatusTimeout,
    Cancelled,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Config(msg) => write!(f, "invalid driver config: {}", msg),
            StreamError::Connect(msg) => write!(f, "connect failed: {}", msg),
            StreamError::FailedToSend(msg) => write!(f, "send failed: {}", msg),
            StreamError::FailedToReceive(msg) => write!(f, "receive failed: {}", msg),
            StreamError::Disconnected => write!(f, "controller disconnected"),
            StreamError::MalformedJob { index, line } => {
                write!(f, "job line {} has no sequence number: '{}'", index, line)
            }
            StreamError::Rejected { seq, code } => {
                write!(f, "controller rejected N{} with code={}", seq, code)
            }
            StreamError::Fault(code) => write!(f, "controller fault code={}", code),
            StreamError::RetriesExhausted { seq } => {
                write!(f, "stream failed: retries exhausted for N{}", seq)
            }
            StreamError::StatusTimeout => write!(f, "no status reply to resume query"),
            StreamError::Cancelled => write!(f, "stream cancelled"),
        }
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}
