// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// Wire layout, fixed: byte 0 is `code`; bytes 1..17 are the raw UUID; bytes
// 17..n are the UTF-8 content. 17 <= n <= 1024.

use bytes::{BufMut, Bytes, BytesMut};
use nom::bytes::complete::take;
use nom::combinator::{map_res, verify};
use nom::number::complete::le_u8;
use nom::IResult;
use uuid::Uuid;

use crate::error::EngineError;

pub const MIN_MESSAGE_LENGTH: usize = 17;
pub const MAX_MESSAGE_LENGTH: usize = 1024;

/// Message type code. Repr as `u8` on the wire.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Code {
    Authorization = 1,
    Ping = 2,
    Private = 3,
    Public = 4,
    Ok = 5,
    Unauthorized = 6,
}

impl Code {
    fn from_u8(v: u8) -> Option<Code> {
        match v {
            1 => Some(Code::Authorization),
            2 => Some(Code::Ping),
            3 => Some(Code::Private),
            4 => Some(Code::Public),
            5 => Some(Code::Ok),
            6 => Some(Code::Unauthorized),
            _ => None,
        }
    }
}

/// A single application-level message.
///
/// `destination` carries the base32 peer identity; it is supplied by the
/// transport layer out-of-band, never parsed from the message body.
/// `name` is populated only on received messages, when the sender is a
/// known contact.
#[derive(Debug, Clone)]
pub struct Message {
    pub code: Code,
    pub uuid: Uuid,
    pub content: String,
    pub destination: Option<String>,
    pub name: Option<String>,
}

impl Message {
    /// Construct a message, generating a fresh UUID.
    pub fn new(code: Code, destination: Option<String>, content: impl Into<String>) -> Self {
        Self {
            code,
            uuid: Uuid::new_v4(),
            content: content.into(),
            destination,
            name: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(Code::Ok, None, "")
    }

    pub fn unauthorized() -> Self {
        Self::new(Code::Unauthorized, None, "")
    }

    /// Encode to wire bytes: 1 byte code, 16 bytes uuid, UTF-8 content.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MIN_MESSAGE_LENGTH + self.content.len());

        buf.put_u8(self.code as u8);
        buf.put_slice(self.uuid.as_bytes());
        buf.put_slice(self.content.as_bytes());

        buf.freeze()
    }

    /// Decode wire bytes received from `destination`.
    pub fn decode(data: &[u8], destination: Option<String>) -> Result<Self, EngineError> {
        let len = data.len();

        if !(MIN_MESSAGE_LENGTH..=MAX_MESSAGE_LENGTH).contains(&len) {
            return Err(EngineError::InvalidSize(len));
        }

        let (rest, (code, uuid)) =
            parse_header(data).map_err(|_| EngineError::InvalidCode(data[0]))?;

        let content = std::str::from_utf8(rest)
            .map_err(|_| EngineError::InvalidUtf8)?
            .to_string();

        Ok(Message {
            code,
            uuid,
            content,
            destination,
            name: None,
        })
    }
}

fn parse_header(input: &[u8]) -> IResult<&[u8], (Code, Uuid)> {
    let (input, code) = map_res(le_u8, |v| Code::from_u8(v).ok_or(()))(input)?;
    let (input, uuid_bytes) = verify(take(16usize), |b: &[u8]| b.len() == 16)(input)?;

    let mut raw = [0u8; 16];
    raw.copy_from_slice(uuid_bytes);

    Ok((input, (code, Uuid::from_bytes(raw))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(code: Code, content: &str) -> Message {
        Message::new(code, Some("dest".to_string()), content)
    }

    #[test]
    fn encode_decode_roundtrip() {
        let m = msg(Code::Private, "hello");
        let bytes = m.encode();
        let decoded = Message::decode(&bytes, Some("dest".to_string())).unwrap();

        assert_eq!(decoded.code, m.code);
        assert_eq!(decoded.uuid, m.uuid);
        assert_eq!(decoded.content, m.content);
    }

    #[test]
    fn encode_then_decode_is_identity_on_bytes() {
        let m = msg(Code::Ok, "");
        let bytes = m.encode();
        let decoded = Message::decode(&bytes, None).unwrap();
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn decode_rejects_too_short() {
        let data = [0u8; 16];
        let err = Message::decode(&data, None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSize(16)));
    }

    #[test]
    fn decode_accepts_minimum_length_with_empty_content() {
        let mut data = vec![Code::Ok as u8];
        data.extend_from_slice(Uuid::new_v4().as_bytes());
        assert_eq!(data.len(), 17);

        let decoded = Message::decode(&data, None).unwrap();
        assert_eq!(decoded.content, "");
    }

    #[test]
    fn decode_accepts_maximum_length() {
        let mut data = vec![Code::Private as u8];
        data.extend_from_slice(Uuid::new_v4().as_bytes());
        data.extend(std::iter::repeat(b'x').take(MAX_MESSAGE_LENGTH - MIN_MESSAGE_LENGTH));
        assert_eq!(data.len(), MAX_MESSAGE_LENGTH);

        assert!(Message::decode(&data, None).is_ok());
    }

    #[test]
    fn decode_rejects_over_max_length() {
        let mut data = vec![Code::Private as u8];
        data.extend_from_slice(Uuid::new_v4().as_bytes());
        data.extend(std::iter::repeat(b'x').take(MAX_MESSAGE_LENGTH - MIN_MESSAGE_LENGTH + 1));

        let err = Message::decode(&data, None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSize(1025)));
    }

    #[test]
    fn decode_rejects_invalid_code() {
        let mut data = vec![0u8];
        data.extend_from_slice(Uuid::new_v4().as_bytes());

        assert!(matches!(
            Message::decode(&data, None).unwrap_err(),
            EngineError::InvalidCode(0)
        ));

        let mut data = vec![7u8];
        data.extend_from_slice(Uuid::new_v4().as_bytes());

        assert!(matches!(
            Message::decode(&data, None).unwrap_err(),
            EngineError::InvalidCode(7)
        ));
    }

    #[test]
    fn decode_rejects_non_utf8_content() {
        let mut data = vec![Code::Private as u8];
        data.extend_from_slice(Uuid::new_v4().as_bytes());
        data.push(0xff);
        data.push(0xfe);

        assert!(matches!(
            Message::decode(&data, None).unwrap_err(),
            EngineError::InvalidUtf8
        ));
    }
}
