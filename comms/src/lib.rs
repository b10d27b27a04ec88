//! Length-prefixed framed messaging over any async byte stream.
//!
//! A frame is a big endian `u64` byte count followed by the encoded message.

mod align;
mod deserialize;
pub mod msg;
mod receiver;
mod sender;
mod serialize;

use tokio::io::{AsyncRead, AsyncWrite};

pub use align::Align4;
pub use deserialize::Deserialize;
pub use receiver::FrameReceiver;
pub use sender::FrameSender;
pub use serialize::Serialize;

type LenType = u64;

/// Largest frame a receiver accepts unless told otherwise, 2 GiB.
pub const DEFAULT_MAX_FRAME: usize = 1 << 31;

/// Wraps the two halves of a stream into framed ends.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
