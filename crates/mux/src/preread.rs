//! Wraps a stream so bytes already consumed during classification are
//! replayed to the acceptor before the live connection.

use std::io::{self, Read, Write};

pub struct PreRead<S> {
    buffered: Vec<u8>,
    cursor: usize,
    inner: S,
}

impl<S> PreRead<S> {
    pub fn new(buffered: Vec<u8>, inner: S) -> Self {
        Self { buffered, cursor: 0, inner }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read> Read for PreRead<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;

        if self.cursor < self.buffered.len() {
            let remaining = &self.buffered[self.cursor..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.cursor += n;
            filled += n;
        }

        // Held bytes exhausted and `buf` still has room: fall through to
        // the live connection in this same call rather than returning a
        // short read.
        if filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(n) => filled += n,
                Err(_) if filled > 0 => return Ok(filled),
                Err(err) => return Err(err),
            }
        }

        Ok(filled)
    }
}

impl<S: Write> Write for PreRead<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn replays_buffered_bytes_before_falling_through_to_the_inner_reader() {
        let mut preread = PreRead::new(b"GET ".to_vec(), Cursor::new(b"/x HTTP/1.1\r\n".to_vec()));
        let mut out = Vec::new();
        preread.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"GET /x HTTP/1.1\r\n");
    }

    #[test]
    fn a_read_buffer_larger_than_the_replay_drains_both_in_one_call() {
        let mut preread = PreRead::new(b"abc".to_vec(), Cursor::new(b"defgh".to_vec()));
        let mut chunk = [0u8; 6];
        let n = preread.read(&mut chunk).unwrap();
        assert_eq!(&chunk[..n], b"abcdef");
        let mut rest = Vec::new();
        preread.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"gh");
    }

    #[test]
    fn a_read_buffer_smaller_than_the_replay_only_drains_the_replay() {
        let mut preread = PreRead::new(b"abcdef".to_vec(), Cursor::new(b"ghi".to_vec()));
        let mut chunk = [0u8; 4];
        let n = preread.read(&mut chunk).unwrap();
        assert_eq!(&chunk[..n], b"abcd");
        let mut rest = Vec::new();
        preread.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"efghi");
    }
}
