use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const PARTIAL: Header = 2;
const REDUCED: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, PartialEq)]
pub enum Payload<'a> {
    /// A node's contribution to a reduction round.
    Partial(&'a [f32]),
    /// The element-wise sum of every contribution of a round.
    Reduced(&'a mut [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Announces a node and the size of the group it expects.
    Join { node_id: usize, nodes: usize },
    /// The node won't take part in any further round.
    Leave,
}

/// The application layer message between nodes and the coordinator.
#[derive(Debug, PartialEq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

fn invalid_data<T>(msg: String) -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidData, msg))
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Data(payload) => {
                let (kind, nums): (_, &[f32]) = match payload {
                    Payload::Partial(nums) => (PARTIAL, &nums[..]),
                    Payload::Reduced(nums) => (REDUCED, &nums[..]),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Ok(Some(bytemuck::cast_slice(nums)))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        let len = buf.len();
        let Some((kind_buf, rest)) = buf.split_first_chunk_mut::<HEADER_SIZE>() else {
            return invalid_data(format!(
                "the given buffer is too small {len}, must at least be {HEADER_SIZE} bytes"
            ));
        };

        match Header::from_be_bytes(*kind_buf) {
            ERR => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            kind @ (PARTIAL | REDUCED) => {
                let nums: &mut [f32] = match bytemuck::try_cast_slice_mut(rest) {
                    Ok(nums) => nums,
                    Err(e) => return invalid_data(format!("malformed f32 payload: {e}")),
                };

                let payload = if kind == PARTIAL {
                    Payload::Partial(nums)
                } else {
                    Payload::Reduced(nums)
                };
                Ok(Self::Data(payload))
            }
            kind => invalid_data(format!("received an invalid kind {kind}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_is_json() {
        let msg = Msg::Control(Command::Join {
            node_id: 1,
            nodes: 3,
        });
        let mut buf = Vec::new();

        assert!(msg.serialize(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..HEADER_SIZE], &CONTROL.to_be_bytes());
        assert_eq!(
            str::from_utf8(&buf[HEADER_SIZE..]).unwrap(),
            r#"{"join":{"node_id":1,"nodes":3}}"#
        );
        assert_eq!(Msg::deserialize(&mut buf).unwrap(), msg);
    }

    #[test]
    fn test_unknown_kind() {
        let mut buf = 9u32.to_be_bytes().to_vec();
        let err = Msg::deserialize(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_short_buffer() {
        assert!(Msg::deserialize(&mut [0, 1]).is_err());
    }
}
