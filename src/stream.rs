//! Seek handling for pipes, sockets and other non-seekable transports.
//!
//! Reader and writer are generic over `Read + Seek` / `Write + Seek`.  A
//! transport that cannot seek is wrapped in [`Unseekable`], whose `seek`
//! always fails with [`io::ErrorKind::NotSeekable`], the same kind the
//! standard library reports for `ESPIPE` on a real pipe.  Corrective seeks
//! (rewind before the archive header, jump to the end before appending) are
//! skipped on that error; forward skips fall back to discarding reads.

use log::{trace, warn};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Adapter giving a plain `Read`/`Write` stream a `Seek` impl that always
/// reports "not seekable".
#[derive(Debug)]
pub struct Unseekable<T>(pub T);

impl<T> Unseekable<T> {
    pub fn into_inner(self) -> T { self.0 }
}

impl<T: Read> Read for Unseekable<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.0.read(buf) }
}

impl<T: Write> Write for Unseekable<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.0.write(buf) }
    fn flush(&mut self) -> io::Result<()> { self.0.flush() }
}

impl<T> Seek for Unseekable<T> {
    fn seek(&mut self, _: SeekFrom) -> io::Result<u64> {
        Err(io::Error::from(io::ErrorKind::NotSeekable))
    }
}

pub(crate) fn is_not_seekable(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotSeekable
}

/// Seek that is only a correction: on a non-seekable stream it is skipped
/// and `Ok(None)` is returned.  Any other failure propagates.
pub(crate) fn corrective_seek<S: Seek>(stream: &mut S, pos: SeekFrom) -> io::Result<Option<u64>> {
    match stream.seek(pos) {
        Ok(p) => Ok(Some(p)),
        Err(e) if is_not_seekable(&e) => {
            warn!("stream is not seekable, skipping seek to {pos:?}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Advance `stream` by `n` bytes.  Seeks when possible, otherwise reads and
/// discards.  Returns how many bytes were actually skipped; a stream that
/// ends early returns less than `n` either way.  A seek never goes past the
/// end of the stream.
pub(crate) fn skip_forward<S: Read + Seek>(stream: &mut S, n: u64) -> io::Result<u64> {
    if n == 0 {
        return Ok(0);
    }
    match stream.stream_position() {
        Ok(pos) => {
            let end = stream.seek(SeekFrom::End(0))?;
            let target = pos.saturating_add(n).min(end.max(pos));
            stream.seek(SeekFrom::Start(target))?;
            let skipped = target - pos;
            trace!("seeked forward {skipped} of {n} bytes");
            return Ok(skipped);
        }
        Err(e) if is_not_seekable(&e) => {}
        Err(e) => return Err(e),
    }
    let skipped = io::copy(&mut stream.by_ref().take(n), &mut io::sink())?;
    trace!("discarded {skipped} of {n} bytes");
    Ok(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn unseekable_refuses_to_seek() {
        let mut s = Unseekable(Cursor::new(vec![1u8, 2, 3]));
        let err = s.seek(SeekFrom::Start(0)).unwrap_err();
        assert!(is_not_seekable(&err));
        assert_eq!(corrective_seek(&mut s, SeekFrom::Start(0)).unwrap(), None);
    }

    #[test]
    fn skip_discards_on_unseekable() {
        let mut s = Unseekable(Cursor::new((0u8..20).collect::<Vec<_>>()));
        assert_eq!(skip_forward(&mut s, 5).unwrap(), 5);
        let mut b = [0u8; 1];
        s.read_exact(&mut b).unwrap();
        assert_eq!(b[0], 5);
        // Only 14 bytes remain.
        assert_eq!(skip_forward(&mut s, 100).unwrap(), 14);
    }

    #[test]
    fn skip_seeks_when_possible() {
        let mut c = Cursor::new(vec![0u8; 32]);
        assert_eq!(skip_forward(&mut c, 16).unwrap(), 16);
        assert_eq!(c.position(), 16);
    }

    #[test]
    fn seek_stops_at_end_of_stream() {
        let mut c = Cursor::new(vec![0u8; 20]);
        c.set_position(4);
        assert_eq!(skip_forward(&mut c, 100).unwrap(), 16);
        assert_eq!(c.position(), 20);

        // Same answer as the discarding path.
        let mut p = Unseekable(Cursor::new(vec![0u8; 20]));
        skip_forward(&mut p, 4).unwrap();
        assert_eq!(skip_forward(&mut p, 100).unwrap(), 16);
    }
}
