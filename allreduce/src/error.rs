use std::{error::Error, fmt, io};

/// The allreduce module's result type.
pub type Result<T> = std::result::Result<T, AllReduceErr>;

/// Distributed averaging failures, all of them fatal to the run.
#[derive(Debug)]
pub enum AllReduceErr {
    Io(io::Error),
    /// The peer sent a message that doesn't fit the current step.
    UnexpectedMessage { got: String },
    /// A node announced a group size different from the coordinator's.
    GroupMismatch { expected: usize, got: usize },
    /// A vector of a different length than the round's was contributed.
    LengthMismatch { expected: usize, got: usize },
    /// The coordinator refused the node.
    Rejected(String),
    /// The averaging setup is unusable.
    InvalidConfig(String),
}

impl fmt::Display for AllReduceErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllReduceErr::Io(e) => write!(f, "io error: {e}"),
            AllReduceErr::UnexpectedMessage { got } => write!(f, "unexpected message: {got}"),
            AllReduceErr::GroupMismatch { expected, got } => write!(
                f,
                "group size mismatch: the coordinator expects {expected} nodes, got {got}"
            ),
            AllReduceErr::LengthMismatch { expected, got } => write!(
                f,
                "vector length mismatch: got {got}, expected {expected}"
            ),
            AllReduceErr::Rejected(reason) => write!(f, "rejected by the coordinator: {reason}"),
            AllReduceErr::InvalidConfig(reason) => write!(f, "invalid averaging setup: {reason}"),
        }
    }
}

impl Error for AllReduceErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AllReduceErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for AllReduceErr {
    fn from(e: io::Error) -> Self {
        AllReduceErr::Io(e)
    }
}
