//! An in-process host: numeric storage with locks, one-time passwords, and
//! capture of everything the device reports.

use std::collections::{HashMap, HashSet, VecDeque};

use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use super::{Host, HostError, Message, Uid, decode_value, encode_value, get_i32, ident};
use crate::interpreter::stack::StackValue;

/// How many counters ahead of the current one an auth attempt may be.
pub const OTP_WINDOW: u32 = 8;

/// Code pair for `secret` at `counter`: the first eight bytes of
/// SHA-256(secret0 || secret1 || counter), all big-endian.
pub fn otp_code(secret: (i32, i32), counter: u32) -> (i32, i32) {
    let mut hasher = Sha256::new();
    hasher.update(secret.0.to_be_bytes());
    hasher.update(secret.1.to_be_bytes());
    hasher.update(counter.to_be_bytes());
    let digest = hasher.finalize();
    let code0 = i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let code1 = i32::from_be_bytes([digest[4], digest[5], digest[6], digest[7]]);
    (code0, code1)
}

#[derive(Debug, Clone, Copy)]
struct Otp {
    secret: (i32, i32),
    counter: u32,
}

#[derive(Debug)]
pub struct MemoryHost {
    numbers: HashMap<(Uid, i32), StackValue>,
    locked: HashSet<(Uid, i32)>,
    otp: HashMap<Uid, Otp>,
    replies: VecDeque<Message>,
    output: Vec<String>,
    failures: Vec<String>,
    invalidations: usize,
    rng: fastrand::Rng,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic secrets.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed))
    }

    fn with_rng(rng: fastrand::Rng) -> Self {
        MemoryHost {
            numbers: HashMap::new(),
            locked: HashSet::new(),
            otp: HashMap::new(),
            replies: VecDeque::new(),
            output: Vec::new(),
            failures: Vec::new(),
            invalidations: 0,
            rng,
        }
    }

    pub fn number(&self, uid: Uid, index: i32) -> Option<StackValue> {
        self.numbers.get(&(uid, index)).copied()
    }

    pub fn otp_secret(&self, uid: Uid) -> Option<(i32, i32)> {
        self.otp.get(&uid).map(|otp| otp.secret)
    }

    /// Captured `log:` and `inspect:` lines since the last call, in order.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations
    }

    fn reply(&mut self, ident: super::Ident, payload: Vec<u8>) {
        self.replies.push_back(Message::new(ident, payload));
    }

    fn status(&mut self, ident: super::Ident, status: i32) {
        self.reply(ident, status.to_be_bytes().to_vec());
    }

    fn handle(&mut self, msg: &Message) -> Option<()> {
        let p = &msg.payload;
        match msg.ident {
            ident::GETN => {
                let key = (Uid(get_i32(p, 0)?, get_i32(p, 4)?), get_i32(p, 8)?);
                let v = self.numbers.get(&key).copied().unwrap_or_default();
                self.reply(ident::NUMA, encode_value(v).to_vec());
            }
            ident::SETN => {
                let key = (Uid(get_i32(p, 0)?, get_i32(p, 4)?), get_i32(p, 8)?);
                let v = decode_value(p.get(12..20)?)?;
                let stored = !self.locked.contains(&key);
                if stored {
                    self.numbers.insert(key, v);
                }
                self.status(ident::SETA, stored as i32);
            }
            ident::LCKN => {
                let key = (Uid(get_i32(p, 0)?, get_i32(p, 4)?), get_i32(p, 8)?);
                self.locked.insert(key);
                self.status(ident::LCKA, 1);
            }
            ident::OTPI => {
                let uid = Uid(get_i32(p, 0)?, get_i32(p, 4)?);
                // A second init must not leak the existing secret.
                let secret = if self.otp.contains_key(&uid) {
                    (0, 0)
                } else {
                    let secret = (self.rng.i32(..), self.rng.i32(..));
                    self.otp.insert(uid, Otp { secret, counter: 0 });
                    secret
                };
                let mut payload = secret.0.to_be_bytes().to_vec();
                payload.extend_from_slice(&secret.1.to_be_bytes());
                self.reply(ident::OTIA, payload);
            }
            ident::OTPA => {
                let uid = Uid(get_i32(p, 0)?, get_i32(p, 4)?);
                let code = (get_i32(p, 8)?, get_i32(p, 12)?);
                let ok = match self.otp.get_mut(&uid) {
                    Some(otp) => {
                        let secret = otp.secret;
                        let end = otp.counter.saturating_add(OTP_WINDOW);
                        match (otp.counter..end).find(|&n| otp_code(secret, n) == code) {
                            Some(n) => {
                                otp.counter = n + 1;
                                true
                            }
                            None => false,
                        }
                    }
                    None => false,
                };
                self.status(ident::OTAA, ok as i32);
            }
            ident::OTPS => {
                let uid = Uid(get_i32(p, 0)?, get_i32(p, 4)?);
                let counter = self.otp.get(&uid).map_or(0, |otp| otp.counter);
                self.status(ident::OTSA, counter as i32);
            }
            ident::LOGQ => {
                self.output.push(format!("log: {}", String::from_utf8_lossy(p)));
            }
            ident::INSP => {
                let v = decode_value(p)?;
                self.output.push(format!("inspect: {v}"));
            }
            ident::INVL => self.invalidations += 1,
            ident::EROR => self.failures.push(String::from_utf8_lossy(p).into_owned()),
            ident::REDY | ident::RESP => {}
            _ => return None,
        }
        Some(())
    }
}

impl Host for MemoryHost {
    fn send(&mut self, msg: &Message) -> Result<(), HostError> {
        trace!(ident = %msg.ident_str(), len = msg.payload.len(), "memory host received");
        if self.handle(msg).is_none() {
            warn!(ident = %msg.ident_str(), len = msg.payload.len(), "memory host rejected message");
            self.reply(ident::NACK, Vec::new());
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<Message, HostError> {
        let msg = self.replies.pop_front().ok_or(HostError::NoReply)?;
        debug!(ident = %msg.ident_str(), "memory host reply");
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ask(host: &mut MemoryHost, ident: super::super::Ident, payload: &[i32]) -> Message {
        let mut buf = Vec::new();
        for v in payload {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        host.send(&Message::new(ident, buf)).unwrap();
        host.recv().unwrap()
    }

    #[test]
    fn unset_number_reads_as_zero() {
        let mut host = MemoryHost::with_seed(1);
        let reply = ask(&mut host, ident::GETN, &[1, 2, 3]);
        assert_eq!(reply.ident, ident::NUMA);
        assert_eq!(decode_value(&reply.payload), Some(StackValue::Int(0)));
    }

    #[test]
    fn locked_number_refuses_store() {
        let mut host = MemoryHost::with_seed(1);
        let h: &mut dyn Host = &mut host;
        assert_eq!(h.set_number(Uid(1, 1), 4, StackValue::Float(0.5), "setn"), Ok(1));
        assert_eq!(h.lock_number(Uid(1, 1), 4, "lockn"), Ok(1));
        assert_eq!(h.set_number(Uid(1, 1), 4, StackValue::Int(9), "setn"), Ok(0));
        assert_eq!(host.number(Uid(1, 1), 4), Some(StackValue::Float(0.5)));
    }

    #[test]
    fn otp_window_and_replay() {
        let mut host = MemoryHost::with_seed(3);
        let h: &mut dyn Host = &mut host;
        let secret = h.otp_init(Uid(5, 6)).unwrap();
        // skip ahead inside the window
        let code = otp_code(secret, 3);
        assert_eq!(h.otp_auth(Uid(5, 6), code), Ok(true));
        assert_eq!(h.otp_sync(Uid(5, 6)), Ok(4));
        // replay is rejected
        assert_eq!(h.otp_auth(Uid(5, 6), code), Ok(false));
        assert_eq!(h.otp_auth(Uid(5, 6), otp_code(secret, 4 + OTP_WINDOW)), Ok(false));
    }

    #[test]
    fn otp_init_twice_hides_secret() {
        let mut host = MemoryHost::with_seed(3);
        let h: &mut dyn Host = &mut host;
        h.otp_init(Uid(5, 6)).unwrap();
        assert_eq!(h.otp_init(Uid(5, 6)), Ok((0, 0)));
    }

    #[test]
    fn otp_unknown_user() {
        let mut host = MemoryHost::with_seed(3);
        let h: &mut dyn Host = &mut host;
        assert_eq!(h.otp_auth(Uid(1, 1), (0, 0)), Ok(false));
        assert_eq!(h.otp_sync(Uid(1, 1)), Ok(0));
    }

    #[test]
    fn malformed_request_gets_nack() {
        let mut host = MemoryHost::with_seed(1);
        let reply = ask(&mut host, ident::GETN, &[1]);
        assert_eq!(reply.ident, ident::NACK);
        let reply = ask(&mut host, *b"WHAT", &[]);
        assert_eq!(reply.ident, ident::NACK);
    }

    #[test]
    fn captures_reports() {
        let mut host = MemoryHost::with_seed(1);
        let h: &mut dyn Host = &mut host;
        h.log("hi").unwrap();
        h.inspect(StackValue::Float(0.25)).unwrap();
        h.invalidate().unwrap();
        h.fail("boom").unwrap();
        assert_eq!(host.take_output(), vec!["log: hi", "inspect: f0.25"]);
        assert!(host.take_output().is_empty());
        assert_eq!(host.invalidations(), 1);
        assert_eq!(host.failures(), ["boom"]);
    }

    #[test]
    fn seeded_secrets_repeat() {
        let mut a = MemoryHost::with_seed(9);
        let mut b = MemoryHost::with_seed(9);
        let ha: &mut dyn Host = &mut a;
        let hb: &mut dyn Host = &mut b;
        assert_eq!(ha.otp_init(Uid(1, 2)), hb.otp_init(Uid(1, 2)));
    }

    #[test]
    fn otp_code_is_stable() {
        assert_eq!(otp_code((1, 2), 0), otp_code((1, 2), 0));
        assert_ne!(otp_code((1, 2), 0), otp_code((1, 2), 1));
    }
}
