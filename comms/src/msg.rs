use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A rank's contribution to a collective, sent to the root.
    Partial(&'a [f32]),
    /// The result of a collective, sent by the root.
    Full(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Hello { rank: usize },
    Barrier,
    Disconnect,
}

/// The application layer message exchanged between ranks.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind:#010x}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                let header = (0 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                let header = (1 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Data(payload) => {
                let (kind, nums) = match payload {
                    Payload::Partial(nums) => (2, *nums),
                    Payload::Full(nums) => (3, *nums),
                };

                let header = (kind as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Ok(Some(bytemuck::cast_slice(nums)))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(kind_buf);
        let kind = Header::from_be_bytes(header);

        match kind {
            0 => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            1 => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            2..4 => {
                let nums: &[f32] = bytemuck::try_cast_slice_mut::<u8, f32>(rest).map_err(|err| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("bad tensor bytes: {err}"))
                })?;

                let payload = if kind == 2 {
                    Payload::Partial(nums)
                } else {
                    Payload::Full(nums)
                };

                Ok(Self::Data(payload))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_bytes(msg: &Msg) -> Vec<u8> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).unwrap();
        if let Some(tail) = tail {
            buf.extend_from_slice(tail);
        }
        buf
    }

    #[test]
    fn control_command_is_json_after_header() {
        let msg = Msg::Control(Command::Hello { rank: 3 });
        let bytes = roundtrip_bytes(&msg);

        assert_eq!(&bytes[..HEADER_SIZE], &1u32.to_be_bytes());
        assert_eq!(&bytes[HEADER_SIZE..], br#"{"hello":{"rank":3}}"#);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut bytes = 9u32.to_be_bytes().to_vec();
        let err = Msg::deserialize(&mut bytes[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn high_header_bytes_are_not_truncated() {
        let mut bytes = 0x0000_0102u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(bytemuck::cast_slice(&[1.0f32]));

        let err = Msg::deserialize(&mut bytes[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut bytes = vec![0u8; 2];
        assert!(Msg::deserialize(&mut bytes[..]).is_err());
    }
}
