use std::{error::Error, fmt, io};

use crate::buffer::BufferErr;

/// The learner module's result type.
pub type Result<T> = std::result::Result<T, LearnErr>;

/// The error type returned by an external collaborator hook.
pub type HookErr = Box<dyn Error + Send + Sync + 'static>;

/// Learning engine failures.
///
/// Every variant aborts the run, recoverable conditions are reported
/// through the log instead.
#[derive(Debug)]
pub enum LearnErr {
    /// A buffer was read past its front.
    Buffer(BufferErr),
    /// A namespace was removed out of stack order.
    NamespaceOrder { namespace: u8, reason: &'static str },
    /// An example header appeared after the first position of a group.
    HeaderNotFirst { position: usize },
    /// An example header was given to the single line layout.
    HeaderInSingleLine,
    /// A group mixed label definitions with regular examples.
    MixedLabelDefinitions,
    /// A learner received a label of the wrong kind.
    LabelKind { expected: &'static str },
    /// The configuration was rejected before the run started.
    InvalidConfig(String),
    /// The distributed averaging call failed.
    Averaging(HookErr),
    /// Persisting the weights failed.
    Checkpoint(HookErr),
    Io(io::Error),
}

impl fmt::Display for LearnErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearnErr::Buffer(e) => write!(f, "{e}"),
            LearnErr::NamespaceOrder { namespace, reason } => {
                write!(f, "namespace {namespace} removed out of order: {reason}")
            }
            LearnErr::HeaderNotFirst { position } => write!(
                f,
                "example header at position {position}, headers are only allowed in the initial position"
            ),
            LearnErr::HeaderInSingleLine => {
                f.write_str("example headers are not allowed in single line mode")
            }
            LearnErr::MixedLabelDefinitions => {
                f.write_str("mixed label definitions and examples in one group")
            }
            LearnErr::LabelKind { expected } => {
                write!(f, "unexpected label kind, expected a {expected} label")
            }
            LearnErr::InvalidConfig(reason) => write!(f, "invalid configuration: {reason}"),
            LearnErr::Averaging(e) => write!(f, "weight averaging failed: {e}"),
            LearnErr::Checkpoint(e) => write!(f, "checkpoint failed: {e}"),
            LearnErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for LearnErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LearnErr::Buffer(e) => Some(e),
            LearnErr::Averaging(e) | LearnErr::Checkpoint(e) => Some(e.as_ref()),
            LearnErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BufferErr> for LearnErr {
    fn from(value: BufferErr) -> Self {
        Self::Buffer(value)
    }
}

impl From<io::Error> for LearnErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
