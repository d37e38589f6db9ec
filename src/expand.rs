//! Expansion of blank-compressed text data.
//!
//! Text on a MAGSAV tape is stored with runs of spaces replaced by the escape byte (DC1)
//! followed by a count byte.  Lines are padded to a whole number of 16-bit words: a newline that
//! lands on an even offset is followed by one byte of padding, which is dropped.
//!
//! Tapes written by machines that set the high ("parity") bit on every character can have it
//! removed with [`Expander::strip_parity`]; otherwise bytes are copied as they are.

use std::io::{self, Write};

use log::trace;

use crate::format::{BLANK_ESCAPE, BLOCK_SIZE, PARITY_MASK};

/// Undoes blank compression and line padding, buffering output in block-sized writes.
///
/// The escape state is sticky: an escape byte that ends one data record takes its count from
/// the first byte of the next.  Call [`Expander::reset`] when starting a new file.
#[derive(Debug)]
pub struct Expander {
    escape_pending: bool,
    strip_parity: bool,
    buffer: Vec<u8>,
}

impl Default for Expander {
    fn default() -> Self {
        Self::new()
    }
}

impl Expander {
    pub fn new() -> Self {
        Self {
            escape_pending: false,
            strip_parity: false,
            buffer: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    /// Masks the parity bit off every payload byte, repeat counts included, before decoding.
    pub fn strip_parity(mut self, strip: bool) -> Self {
        self.strip_parity = strip;
        self
    }

    /// Forgets any pending escape.
    pub fn reset(&mut self) {
        self.escape_pending = false;
    }

    pub fn escape_pending(&self) -> bool {
        self.escape_pending
    }

    /// Expands one data record's payload into `out`.
    ///
    /// All output is written to `out` before returning.
    pub fn expand(&mut self, payload: &[u8], out: &mut impl Write) -> io::Result<()> {
        let mut i = 0;
        while i < payload.len() {
            let c = if self.strip_parity {
                payload[i] & PARITY_MASK
            } else {
                payload[i]
            };

            if self.escape_pending {
                self.escape_pending = false;
                for _ in 0..c {
                    self.push(b' ', out)?;
                }
                i += 1;
                continue;
            }

            if c == BLANK_ESCAPE {
                self.escape_pending = true;
                i += 1;
                continue;
            }

            self.push(c, out)?;
            if c == b'\n' && i % 2 == 0 {
                // word alignment padding
                i += 1;
            }
            i += 1;
        }

        self.flush(out)
    }

    fn push(&mut self, c: u8, out: &mut impl Write) -> io::Result<()> {
        self.buffer.push(c);
        if self.buffer.len() == BLOCK_SIZE {
            self.flush(out)?;
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut impl Write) -> io::Result<()> {
        if !self.buffer.is_empty() {
            trace!("flushing {} expanded bytes", self.buffer.len());
            out.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::testutil::compress;

    fn expand_to_vec(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![];
        Expander::new().expand(payload, &mut out).unwrap();
        out
    }

    /// Counts write calls so buffering can be checked.
    #[derive(Default)]
    struct Writes(Vec<usize>, Vec<u8>);

    impl Write for Writes {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.push(buf.len());
            self.1.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_identity_without_escapes() {
        let text = b"The quick brown fox jumps over the lazy dog.";
        assert_eq!(expand_to_vec(text), text);
        assert_eq!(expand_to_vec(b""), b"");
    }

    #[test]
    fn test_blank_runs() {
        for k in 0..=255u8 {
            let out = expand_to_vec(&[BLANK_ESCAPE, k]);
            assert_eq!(out.len(), k as usize);
            assert!(out.iter().all(|&c| c == b' '));
        }
        assert_eq!(expand_to_vec(b"a\x11\x03b"), b"a   b");
    }

    #[test]
    fn test_newline_alignment() {
        // newline at offset 0 (even): the pad byte after it is dropped
        assert_eq!(expand_to_vec(b"\n\0ab"), b"\nab");
        // newline at offset 1 (odd): nothing dropped
        assert_eq!(expand_to_vec(b"a\nbc"), b"a\nbc");
        // newline at offset 2 (even)
        assert_eq!(expand_to_vec(b"ab\n\0cd"), b"ab\ncd");
    }

    #[test]
    fn test_high_bytes_are_literal() {
        let high: Vec<u8> = (0x80..=0xff).collect();
        assert_eq!(expand_to_vec(&high), high);

        // 0x91 is not an escape, and 0x8a is not a newline
        assert_eq!(
            expand_to_vec(&[0xc1, 0xe2, 0x91, 0x05]),
            [0xc1, 0xe2, 0x91, 0x05]
        );
        assert_eq!(expand_to_vec(&[0x8a, 0x00]), [0x8a, 0x00]);
    }

    #[test]
    fn test_strip_parity() {
        let mut expander = Expander::new().strip_parity(true);
        let mut out = vec![];
        expander
            .expand(&[0xc1, 0xe2, 0x91, 0x85, 0x8a, 0x80], &mut out)
            .unwrap();
        // the count loses its high bit too, and the newline's pad byte is dropped
        assert_eq!(out, b"Ab     \n");
    }

    #[test]
    fn test_escape_spans_records() {
        let mut expander = Expander::new();
        let mut out = vec![];
        expander.expand(b"ab\x11", &mut out).unwrap();
        assert!(expander.escape_pending());
        expander.expand(b"\x02cd", &mut out).unwrap();
        assert_eq!(out, b"ab  cd");

        expander.expand(b"\x11", &mut out).unwrap();
        expander.reset();
        expander.expand(b"\x05", &mut out).unwrap();
        assert_eq!(out, b"ab  cd\x05");
    }

    #[test]
    fn test_block_buffering() {
        let mut expander = Expander::new();
        let mut out = Writes::default();

        // 20 runs of 255 spaces = 5100 bytes: one full block then the remainder
        let payload: Vec<u8> = (0..20).flat_map(|_| [BLANK_ESCAPE, 255]).collect();
        expander.expand(&payload, &mut out).unwrap();
        assert_eq!(out.0, vec![BLOCK_SIZE, 5100 - BLOCK_SIZE]);
        assert_eq!(out.1.len(), 5100);
    }

    #[test]
    fn test_compress_helper() {
        let text = b"hello\nworld";
        assert_eq!(expand_to_vec(&compress(text)), text);

        let text = b"col1        col2\n    indented\nx";
        assert_eq!(expand_to_vec(&compress(text)), text);
    }
}
