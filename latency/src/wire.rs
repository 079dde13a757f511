//! Messages exchanged between peers.
//!
//! Probes and acknowledgements share a single channel and are distinguished by a one-byte tag:
//!
//! ```txt
//! tag: u8 | serial: u32 | sender: bytes | payload: bytes
//! ```
//!
//! `serial` is big-endian. `sender` (UTF-8, at most [MAX_NAME_LEN] bytes) and `payload` are
//! prefixed with their varint-encoded length.

use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use rand::RngCore;

/// Maximum length (in bytes) of a peer name.
pub const MAX_NAME_LEN: usize = 255;

const PROBE: u8 = 0;
const ACK: u8 = 1;

/// Returns true if `name` can be used as a peer name.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN
}

/// Returns the size of the largest message carrying a payload of `payload_size` bytes.
pub fn max_message_size(payload_size: usize) -> usize {
    Message::Probe {
        serial: u32::MAX,
        sender: "x".repeat(MAX_NAME_LEN),
        payload: Bytes::from(vec![0; payload_size]),
    }
    .encode_size()
}

/// A message sent over the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Sent by the peer whose turn it is.
    Probe {
        serial: u32,
        sender: String,
        payload: Bytes,
    },

    /// Sent by every other peer in reply to a [Message::Probe].
    Ack {
        serial: u32,
        sender: String,
        payload: Bytes,
    },
}

impl Message {
    /// Returns the serial the message refers to.
    pub fn serial(&self) -> u32 {
        match self {
            Message::Probe { serial, .. } | Message::Ack { serial, .. } => *serial,
        }
    }

    /// Returns the name of the peer that sent the message.
    pub fn sender(&self) -> &str {
        match self {
            Message::Probe { sender, .. } | Message::Ack { sender, .. } => sender,
        }
    }

    /// Returns the payload carried by the message.
    pub fn payload(&self) -> &Bytes {
        match self {
            Message::Probe { payload, .. } | Message::Ack { payload, .. } => payload,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Message::Probe { .. } => PROBE,
            Message::Ack { .. } => ACK,
        }
    }

    fn sender_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.sender().as_bytes())
    }
}

impl Write for Message {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.tag());
        self.serial().write(buf);
        self.sender_bytes().write(buf);
        self.payload().write(buf);
    }
}

impl EncodeSize for Message {
    fn encode_size(&self) -> usize {
        1 + self.serial().encode_size()
            + self.sender_bytes().encode_size()
            + self.payload().encode_size()
    }
}

impl Read for Message {
    /// Maximum payload size (in bytes).
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_payload: &usize) -> Result<Self, Error> {
        let tag = u8::read(buf)?;
        let serial = u32::read(buf)?;
        let sender = Bytes::read_cfg(buf, &(..=MAX_NAME_LEN).into())?;
        let sender = String::from_utf8(sender.to_vec())
            .map_err(|_| Error::Invalid("latency::wire::Message", "sender name not utf-8"))?;
        let payload = Bytes::read_cfg(buf, &(..=*max_payload).into())?;
        match tag {
            PROBE => Ok(Message::Probe {
                serial,
                sender,
                payload,
            }),
            ACK => Ok(Message::Ack {
                serial,
                sender,
                payload,
            }),
            _ => Err(Error::InvalidEnum(tag)),
        }
    }
}

/// Generate a random payload of `size` bytes.
pub fn payload(rng: &mut impl RngCore, size: usize) -> Bytes {
    let mut payload = vec![0; size];
    rng.fill_bytes(&mut payload);
    payload.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use commonware_codec::{Decode, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    fn probe() -> Message {
        Message::Probe {
            serial: 42,
            sender: "alpha".into(),
            payload: Bytes::from_static(b"hello"),
        }
    }

    #[test]
    fn test_codec_probe() {
        let original = probe();
        let encoded = original.encode();
        assert_eq!(encoded.len(), original.encode_size());
        assert_eq!(encoded[0], PROBE);
        assert_eq!(&encoded[1..5], &42u32.to_be_bytes());
        let decoded = Message::decode_cfg(encoded, &1024).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_codec_ack() {
        let original = Message::Ack {
            serial: 7,
            sender: "gamma".into(),
            payload: Bytes::new(),
        };
        let decoded = Message::decode_cfg(original.encode(), &0).unwrap();
        assert_eq!(decoded.serial(), 7);
        assert_eq!(decoded.sender(), "gamma");
        assert!(decoded.payload().is_empty());
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_truncated() {
        let encoded = probe().encode().freeze();
        for len in 0..encoded.len() {
            assert!(Message::decode_cfg(encoded.slice(..len), &1024).is_err());
        }
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut encoded = probe().encode();
        encoded.put_u8(0);
        assert!(matches!(
            Message::decode_cfg(encoded, &1024),
            Err(Error::ExtraData(1))
        ));
    }

    #[test]
    fn test_decode_unknown_tag() {
        let mut encoded = probe().encode();
        encoded[0] = 9;
        assert!(matches!(
            Message::decode_cfg(encoded, &1024),
            Err(Error::InvalidEnum(9))
        ));
    }

    #[test]
    fn test_decode_payload_too_large() {
        assert!(matches!(
            Message::decode_cfg(probe().encode(), &4),
            Err(Error::InvalidLength(5))
        ));
    }

    #[test]
    fn test_decode_sender_too_long() {
        let message = Message::Ack {
            serial: 1,
            sender: "x".repeat(MAX_NAME_LEN + 1),
            payload: Bytes::new(),
        };
        assert!(matches!(
            Message::decode_cfg(message.encode(), &0),
            Err(Error::InvalidLength(len)) if len == MAX_NAME_LEN + 1
        ));
    }

    #[test]
    fn test_decode_invalid_sender() {
        let mut buf = BytesMut::new();
        buf.put_u8(ACK);
        1u32.write(&mut buf);
        Bytes::from_static(&[0xff, 0xfe]).write(&mut buf);
        Bytes::new().write(&mut buf);
        assert!(matches!(
            Message::decode_cfg(buf, &0),
            Err(Error::Invalid(_, "sender name not utf-8"))
        ));
    }

    #[test]
    fn test_valid_name() {
        assert!(valid_name("alpha"));
        assert!(valid_name(&"x".repeat(MAX_NAME_LEN)));
        assert!(!valid_name(""));
        assert!(!valid_name(&"x".repeat(MAX_NAME_LEN + 1)));
    }

    #[test]
    fn test_max_message_size() {
        for payload_size in [0, 1, 64, 1024, 100_000] {
            let message = Message::Ack {
                serial: 1,
                sender: "x".repeat(MAX_NAME_LEN),
                payload: Bytes::from(vec![1; payload_size]),
            };
            assert_eq!(message.encode().len(), max_message_size(payload_size));
        }
    }

    #[test]
    fn test_payload_size() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(payload(&mut rng, 1024).len(), 1024);
        assert!(payload(&mut rng, 0).is_empty());
    }
}
