use std::io::{self, ErrorKind, Read, Write};

use tracing::trace;

use super::{Host, HostError, Ident, MAX_PAYLOAD, Message};

pub fn write_message<W: Write>(w: &mut W, msg: &Message) -> Result<(), HostError> {
    let len = u32::try_from(msg.payload.len()).map_err(|_| HostError::TooLarge(u32::MAX))?;
    w.write_all(&msg.ident)?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(&msg.payload)?;
    w.flush()?;
    Ok(())
}

/// Read one frame. Only the wait for its first byte may time out; once a frame
/// has started, the rest is read whole.
pub fn read_message<R: Read>(r: &mut R) -> Result<Message, HostError> {
    let mut ident: Ident = [0; 4];
    loop {
        match r.read(&mut ident[..1]) {
            Ok(0) => return Err(HostError::Closed),
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(map_io(e)),
        }
    }
    read_rest(r, &mut ident[1..])?;
    let mut len = [0; 4];
    read_rest(r, &mut len)?;
    let len = u32::from_be_bytes(len);
    if len > MAX_PAYLOAD {
        return Err(HostError::TooLarge(len));
    }
    let mut payload = vec![0; len as usize];
    read_rest(r, &mut payload)?;
    Ok(Message { ident, payload })
}

fn read_rest<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), HostError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => return Err(HostError::Io(ErrorKind::UnexpectedEof.into())),
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                trace!(filled, "stalled inside a frame");
            }
            Err(e) => return Err(HostError::Io(e)),
        }
    }
    Ok(())
}

fn map_io(e: io::Error) -> HostError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => HostError::Timeout,
        _ => HostError::Io(e),
    }
}

/// Framed messages over a byte stream.
pub struct StreamHost<S> {
    stream: S,
}

impl<S: Read + Write> StreamHost<S> {
    pub fn new(stream: S) -> Self {
        StreamHost { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> Host for StreamHost<S> {
    fn send(&mut self, msg: &Message) -> Result<(), HostError> {
        trace!(ident = %msg.ident_str(), len = msg.payload.len(), "send");
        write_message(&mut self.stream, msg).map_err(|e| match e {
            HostError::Io(io) => map_io(io),
            other => other,
        })
    }

    fn recv(&mut self) -> Result<Message, HostError> {
        let msg = read_message(&mut self.stream)?;
        trace!(ident = %msg.ident_str(), len = msg.payload.len(), "recv");
        Ok(msg)
    }
}

/// Glue a separate reader and writer (stdin and stdout) into one stream.
pub struct Duplex<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> Duplex<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Duplex { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W> Read for Duplex<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<R, W: Write> Write for Duplex<R, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ident;
    use std::collections::VecDeque;
    use std::io::Cursor;

    fn framed(msgs: &[Message]) -> Vec<u8> {
        let mut buf = Vec::new();
        for m in msgs {
            write_message(&mut buf, m).unwrap();
        }
        buf
    }

    #[test]
    fn frame_layout() {
        let buf = framed(&[Message::new(ident::LOGQ, b"hi".to_vec())]);
        assert_eq!(buf, b"LOGQ\0\0\0\x02hi");
    }

    #[test]
    fn read_back_in_order() {
        let msgs = [Message::empty(ident::REDY), Message::new(ident::RQST, b"int:i1".to_vec())];
        let mut cursor = Cursor::new(framed(&msgs));
        assert_eq!(read_message(&mut cursor).unwrap(), msgs[0]);
        assert_eq!(read_message(&mut cursor).unwrap(), msgs[1]);
        assert!(matches!(read_message(&mut cursor), Err(HostError::Closed)));
    }

    #[test]
    fn truncated_frame_is_io_error() {
        let mut buf = framed(&[Message::new(ident::RQST, b"int:i1".to_vec())]);
        buf.truncate(10);
        assert!(matches!(read_message(&mut Cursor::new(buf)), Err(HostError::Io(_))));
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = b"RQST".to_vec();
        buf.extend_from_slice(&(MAX_PAYLOAD + 1).to_be_bytes());
        assert!(matches!(read_message(&mut Cursor::new(buf)), Err(HostError::TooLarge(_))));
    }

    struct Stalled;

    impl Read for Stalled {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(ErrorKind::WouldBlock))
        }
    }

    /// Hands out one chunk per read; `None` stands for a read timeout.
    struct Chunked(VecDeque<Option<Vec<u8>>>);

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(None) => Err(io::Error::from(ErrorKind::WouldBlock)),
                Some(Some(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.0.push_front(Some(chunk.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    #[test]
    fn timeout_inside_frame_keeps_reading() {
        let mut reader = Chunked(VecDeque::from([
            Some(b"RQST".to_vec()),
            None,
            Some(b"\0\0\0\x06".to_vec()),
            None,
            Some(b"int:i1".to_vec()),
        ]));
        let msg = read_message(&mut reader).unwrap();
        assert_eq!(msg, Message::new(ident::RQST, b"int:i1".to_vec()));
        assert!(matches!(read_message(&mut reader), Err(HostError::Closed)));
    }

    #[test]
    fn timeout_before_frame_is_idle() {
        let mut reader = Chunked(VecDeque::from([None, Some(b"REDY\0\0\0\0".to_vec())]));
        assert!(matches!(read_message(&mut reader), Err(HostError::Timeout)));
        assert_eq!(read_message(&mut reader).unwrap(), Message::empty(ident::REDY));
    }

    #[test]
    fn stalled_reader_times_out() {
        let mut host = StreamHost::new(Duplex::new(Stalled, Vec::new()));
        assert!(matches!(host.recv(), Err(HostError::Timeout)));
    }

    #[test]
    fn duplex_host_writes_frames() {
        let mut host = StreamHost::new(Duplex::new(Cursor::new(Vec::new()), Vec::new()));
        host.send(&Message::empty(ident::INVL)).unwrap();
        let (_, written) = host.into_inner().into_parts();
        assert_eq!(written, b"INVL\0\0\0\0");
    }
}
