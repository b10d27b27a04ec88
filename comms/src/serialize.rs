use std::io;

/// Encodes a message into a frame.
pub trait Serialize<'a> {
    /// Writes the message into `buf`.
    ///
    /// # Returns
    /// A trailing slice to be sent right after `buf` without copying, if any.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
