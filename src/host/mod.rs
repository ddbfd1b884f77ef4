//! Messages exchanged with the host.
//!
//! Every frame is a four-character ident, a big-endian `u32` length and the
//! payload. Integers inside payloads are big-endian `i32`; a numeric value
//! travels as an 8-byte tagged pair (see [`encode_value`]).

pub mod memory;
pub mod stream;

use tracing::{trace, warn};

use crate::interpreter::error::RuntimeError;
use crate::interpreter::stack::StackValue;

pub type Ident = [u8; 4];

pub mod ident {
    use super::Ident;

    pub const RQST: Ident = *b"RQST";
    pub const RESP: Ident = *b"RESP";
    pub const REDY: Ident = *b"REDY";
    pub const INVL: Ident = *b"INVL";
    pub const LOGQ: Ident = *b"LOGQ";
    pub const INSP: Ident = *b"INSP";
    pub const EROR: Ident = *b"EROR";

    pub const GETN: Ident = *b"GETN";
    pub const NUMA: Ident = *b"NUMA";
    pub const SETN: Ident = *b"SETN";
    pub const SETA: Ident = *b"SETA";
    pub const LCKN: Ident = *b"LCKN";
    pub const LCKA: Ident = *b"LCKA";

    pub const OTPI: Ident = *b"OTPI";
    pub const OTIA: Ident = *b"OTIA";
    pub const OTPA: Ident = *b"OTPA";
    pub const OTAA: Ident = *b"OTAA";
    pub const OTPS: Ident = *b"OTPS";
    pub const OTSA: Ident = *b"OTSA";

    /// Sent by the in-memory host when it cannot make sense of a request.
    pub const NACK: Ident = *b"NACK";
}

/// Largest payload accepted from the link.
pub const MAX_PAYLOAD: u32 = 1 << 20;

const TAG_INT: u32 = 0;
const TAG_FLOAT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub ident: Ident,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(ident: Ident, payload: Vec<u8>) -> Self {
        Message { ident, payload }
    }

    pub fn empty(ident: Ident) -> Self {
        Message { ident, payload: Vec::new() }
    }

    pub fn ident_str(&self) -> String {
        String::from_utf8_lossy(&self.ident).into_owned()
    }
}

/// Two 32-bit halves that together name a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Uid(pub i32, pub i32);

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host timeout")]
    Timeout,
    #[error("host closed the link")]
    Closed,
    #[error("no reply pending")]
    NoReply,
    #[error("oversized message ({0} bytes)")]
    TooLarge(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<HostError> for RuntimeError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Timeout => RuntimeError::HostTimeout,
            other => RuntimeError::HostLink(other.to_string()),
        }
    }
}

/// The collaborator on the far side of the link. Calls block until the
/// message is fully written or read.
pub trait Host {
    fn send(&mut self, msg: &Message) -> Result<(), HostError>;
    fn recv(&mut self) -> Result<Message, HostError>;
}

impl<H: Host + ?Sized> Host for &mut H {
    fn send(&mut self, msg: &Message) -> Result<(), HostError> {
        (**self).send(msg)
    }

    fn recv(&mut self) -> Result<Message, HostError> {
        (**self).recv()
    }
}

pub fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn get_i32(buf: &[u8], at: usize) -> Option<i32> {
    let bytes = buf.get(at..at + 4)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn encode_value(v: StackValue) -> [u8; 8] {
    let (tag, bits) = match v {
        StackValue::Int(i) => (TAG_INT, i.to_be_bytes()),
        StackValue::Float(f) => (TAG_FLOAT, f.to_be_bytes()),
    };
    let mut out = [0; 8];
    out[..4].copy_from_slice(&tag.to_be_bytes());
    out[4..].copy_from_slice(&bits);
    out
}

pub fn decode_value(buf: &[u8]) -> Option<StackValue> {
    let tag = get_i32(buf, 0)? as u32;
    let raw = get_i32(buf, 4)?;
    match tag {
        TAG_INT => Some(StackValue::Int(raw)),
        TAG_FLOAT => Some(StackValue::Float(f32::from_bits(raw as u32))),
        _ => None,
    }
}

fn uid_payload(uid: Uid, extra: &[i32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 4 * extra.len());
    put_i32(&mut buf, uid.0);
    put_i32(&mut buf, uid.1);
    for v in extra {
        put_i32(&mut buf, *v);
    }
    buf
}

impl dyn Host + '_ {
    /// Fire-and-forget message.
    pub fn notify(&mut self, ident: Ident, payload: Vec<u8>) -> Result<(), RuntimeError> {
        let msg = Message::new(ident, payload);
        trace!(ident = %msg.ident_str(), len = msg.payload.len(), "notify host");
        self.send(&msg)?;
        Ok(())
    }

    /// Send `request` and wait for a reply that must carry `reply` and
    /// exactly `reply_len` payload bytes.
    pub fn exchange(
        &mut self,
        request: Message,
        reply: Ident,
        reply_len: usize,
        command: &'static str,
    ) -> Result<Vec<u8>, RuntimeError> {
        trace!(ident = %request.ident_str(), len = request.payload.len(), command, "host request");
        self.send(&request)?;
        let answer = self.recv()?;
        trace!(ident = %answer.ident_str(), len = answer.payload.len(), command, "host reply");
        if answer.ident != reply || answer.payload.len() != reply_len {
            warn!(ident = %answer.ident_str(), len = answer.payload.len(), command, "unexpected host reply");
            return Err(RuntimeError::BadAnswer { command });
        }
        Ok(answer.payload)
    }

    pub fn get_number(&mut self, uid: Uid, index: i32, command: &'static str) -> Result<StackValue, RuntimeError> {
        let request = Message::new(ident::GETN, uid_payload(uid, &[index]));
        let reply = self.exchange(request, ident::NUMA, 8, command)?;
        decode_value(&reply).ok_or(RuntimeError::BadAnswer { command })
    }

    /// Returns the host's status word (non-zero when stored).
    pub fn set_number(
        &mut self,
        uid: Uid,
        index: i32,
        value: StackValue,
        command: &'static str,
    ) -> Result<i32, RuntimeError> {
        let mut payload = uid_payload(uid, &[index]);
        payload.extend_from_slice(&encode_value(value));
        let reply = self.exchange(Message::new(ident::SETN, payload), ident::SETA, 4, command)?;
        get_i32(&reply, 0).ok_or(RuntimeError::BadAnswer { command })
    }

    pub fn lock_number(&mut self, uid: Uid, index: i32, command: &'static str) -> Result<i32, RuntimeError> {
        let request = Message::new(ident::LCKN, uid_payload(uid, &[index]));
        let reply = self.exchange(request, ident::LCKA, 4, command)?;
        get_i32(&reply, 0).ok_or(RuntimeError::BadAnswer { command })
    }

    pub fn otp_init(&mut self, uid: Uid) -> Result<(i32, i32), RuntimeError> {
        let command = "otp_init";
        let reply = self.exchange(Message::new(ident::OTPI, uid_payload(uid, &[])), ident::OTIA, 8, command)?;
        match (get_i32(&reply, 0), get_i32(&reply, 4)) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(RuntimeError::BadAnswer { command }),
        }
    }

    pub fn otp_auth(&mut self, uid: Uid, code: (i32, i32)) -> Result<bool, RuntimeError> {
        let command = "otp_auth";
        let request = Message::new(ident::OTPA, uid_payload(uid, &[code.0, code.1]));
        let reply = self.exchange(request, ident::OTAA, 4, command)?;
        get_i32(&reply, 0).map(|ok| ok != 0).ok_or(RuntimeError::BadAnswer { command })
    }

    pub fn otp_sync(&mut self, uid: Uid) -> Result<i32, RuntimeError> {
        let command = "otp_sync";
        let reply = self.exchange(Message::new(ident::OTPS, uid_payload(uid, &[])), ident::OTSA, 4, command)?;
        get_i32(&reply, 0).ok_or(RuntimeError::BadAnswer { command })
    }

    pub fn log(&mut self, text: &str) -> Result<(), RuntimeError> {
        self.notify(ident::LOGQ, text.as_bytes().to_vec())
    }

    pub fn inspect(&mut self, value: StackValue) -> Result<(), RuntimeError> {
        self.notify(ident::INSP, encode_value(value).to_vec())
    }

    pub fn invalidate(&mut self) -> Result<(), RuntimeError> {
        self.notify(ident::INVL, Vec::new())
    }

    pub fn fail(&mut self, reason: &str) -> Result<(), RuntimeError> {
        self.notify(ident::EROR, reason.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned replies and records what was sent.
    #[derive(Default)]
    struct Scripted {
        sent: Vec<Message>,
        replies: VecDeque<Message>,
    }

    impl Host for Scripted {
        fn send(&mut self, msg: &Message) -> Result<(), HostError> {
            self.sent.push(msg.clone());
            Ok(())
        }

        fn recv(&mut self) -> Result<Message, HostError> {
            self.replies.pop_front().ok_or(HostError::NoReply)
        }
    }

    #[test]
    fn value_encoding() {
        assert_eq!(encode_value(StackValue::Int(-2)), [0, 0, 0, 0, 0xff, 0xff, 0xff, 0xfe]);
        assert_eq!(decode_value(&encode_value(StackValue::Float(1.5))), Some(StackValue::Float(1.5)));
        assert_eq!(decode_value(&[0, 0, 0, 9, 0, 0, 0, 0]), None);
        assert_eq!(decode_value(&[0, 0, 0]), None);
    }

    #[test]
    fn get_number_round_trip() {
        let mut host = Scripted::default();
        host.replies.push_back(Message::new(ident::NUMA, encode_value(StackValue::Int(42)).to_vec()));
        let h: &mut dyn Host = &mut host;
        assert_eq!(h.get_number(Uid(1, 2), 3, "getn"), Ok(StackValue::Int(42)));
        assert_eq!(host.sent[0].ident, ident::GETN);
        assert_eq!(host.sent[0].payload, vec![0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
    }

    #[test]
    fn wrong_reply_ident_is_bad_answer() {
        let mut host = Scripted::default();
        host.replies.push_back(Message::new(ident::SETA, vec![0; 8]));
        let h: &mut dyn Host = &mut host;
        assert_eq!(
            h.get_number(Uid(0, 0), 0, "getn"),
            Err(RuntimeError::BadAnswer { command: "getn" })
        );
    }

    #[test]
    fn wrong_reply_size_is_bad_answer() {
        let mut host = Scripted::default();
        host.replies.push_back(Message::new(ident::OTAA, vec![0; 5]));
        let h: &mut dyn Host = &mut host;
        assert_eq!(
            h.otp_auth(Uid(0, 0), (1, 2)),
            Err(RuntimeError::BadAnswer { command: "otp_auth" })
        );
    }

    #[test]
    fn missing_reply_is_link_failure() {
        let mut host = Scripted::default();
        let h: &mut dyn Host = &mut host;
        assert!(matches!(h.otp_sync(Uid(0, 0)), Err(RuntimeError::HostLink(_))));
    }

    #[test]
    fn timeout_maps_to_runtime_error() {
        assert_eq!(RuntimeError::from(HostError::Timeout), RuntimeError::HostTimeout);
    }
}
