//! Sources of physical tape blocks.
//!
//! A tape is read one physical record at a time: each read returns exactly one block of data, a
//! zero-length read for a tape mark, or an error.  [`BlockSource`] captures that contract so that
//! the decoder can run against a real drive (see [`crate::tape::TapeDevice`]), a SIMH tape image
//! ([`TapImage`]) or an in-memory tape built by a test ([`MemoryTape`]).

use std::{
    collections::VecDeque,
    io::{self, Error, ErrorKind, Read},
};

use log::trace;

use crate::{
    error::{DecodeError, Result},
    tape::TapeControl,
};

/// Outcome of reading one physical block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockRead {
    /// A block of this many bytes was read into the buffer.
    Data(usize),
    /// A zero-length record: a tape mark.
    Eof,
}

impl BlockRead {
    /// Number of bytes read; zero for a tape mark.
    pub fn len(self) -> usize {
        match self {
            Self::Data(n) => n,
            Self::Eof => 0,
        }
    }

    pub fn is_eof(self) -> bool {
        self.len() == 0
    }
}

/// Something that produces tape blocks in order.
pub trait BlockSource {
    /// Reads the next physical block into `buf`.
    ///
    /// Failures of the underlying medium are reported as [`DecodeError::Device`].
    fn read_block(&mut self, buf: &mut [u8]) -> Result<BlockRead>;
}

impl<T: BlockSource + ?Sized> BlockSource for &mut T {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<BlockRead> {
        (**self).read_block(buf)
    }
}

/// Like `Read::read_exact()`, but distinguishes a clean EOF (nothing read at all, `Ok(false)`)
/// from a truncated read (`ErrorKind::UnexpectedEof`).  Retries on EINTR.
fn read_exactish(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let buflen = buf.len();
    let mut todo: &mut [u8] = buf;

    while !todo.is_empty() {
        match reader.read(todo) {
            Ok(0) => {
                return match todo.len() {
                    s if s == buflen => Ok(false), // clean EOF
                    _ => Err(Error::from(ErrorKind::UnexpectedEof)),
                };
            }
            Ok(n) => todo = &mut todo[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(true)
}

const TAP_TAPE_MARK: u32 = 0;
const TAP_END_OF_MEDIUM: u32 = 0xffff_ffff;
const TAP_ERROR_FLAG: u32 = 0x8000_0000;
const TAP_LENGTH_MASK: u32 = 0x00ff_ffff;

/// Reads a SIMH `.tap` tape image.
///
/// Every record is stored as a 32-bit little-endian length, the data padded to an even number of
/// bytes, and the length again.  A length of zero is a tape mark; all ones marks the end of the
/// medium.  Running off the end of the image, or hitting the end-of-medium marker, reads as a
/// tape mark, so a truncated image fails in the decoder rather than here.
#[derive(Debug)]
pub struct TapImage<R> {
    reader: R,
    records: u64,
}

impl<R: Read> TapImage<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, records: 0 }
    }

    fn read_length(&mut self) -> io::Result<Option<u32>> {
        let mut word = [0u8; 4];
        Ok(read_exactish(&mut self.reader, &mut word)?.then(|| u32::from_le_bytes(word)))
    }

    fn read_record(&mut self, buf: &mut [u8]) -> io::Result<BlockRead> {
        let header = match self.read_length()? {
            None | Some(TAP_TAPE_MARK) | Some(TAP_END_OF_MEDIUM) => return Ok(BlockRead::Eof),
            Some(header) => header,
        };

        if header & TAP_ERROR_FLAG != 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("bad record flagged in image at record {}", self.records),
            ));
        }

        let len = (header & TAP_LENGTH_MASK) as usize;
        if len > buf.len() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("record of {len} bytes exceeds block size {}", buf.len()),
            ));
        }

        self.reader.read_exact(&mut buf[..len])?;
        if len % 2 != 0 {
            let mut pad = [0u8; 1];
            self.reader.read_exact(&mut pad)?;
        }

        match self.read_length()? {
            Some(trailer) if trailer == header => {}
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("record {} has a mismatched trailing length", self.records),
                ))
            }
        }

        self.records += 1;
        Ok(BlockRead::Data(len))
    }
}

impl<R: Read> BlockSource for TapImage<R> {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<BlockRead> {
        let read = self.read_record(buf).map_err(DecodeError::Device)?;
        trace!("image record {}: {read:?}", self.records);
        Ok(read)
    }
}

/// One item on a [`MemoryTape`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryBlock {
    /// A data block.
    Data(Vec<u8>),
    /// A tape mark (zero-length read).
    Mark,
    /// The physical end of this reel: reads fail with the end-of-tape status set until the tape
    /// is rewound, which mounts whatever follows.
    EndOfTape,
    /// A read failure unrelated to end-of-tape.
    Fault,
}

/// A tape held in memory, for tests and for decoding already-captured blocks.
///
/// Reading past the last block returns tape marks.
#[derive(Clone, Debug, Default)]
pub struct MemoryTape {
    blocks: VecDeque<MemoryBlock>,
    at_end_of_tape: bool,
    rewinds: usize,
}

impl MemoryTape {
    pub fn new(blocks: impl IntoIterator<Item = MemoryBlock>) -> Self {
        Self {
            blocks: blocks.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Number of times the tape was rewound (volumes swapped).
    pub fn rewinds(&self) -> usize {
        self.rewinds
    }

    /// Number of items not yet consumed.
    pub fn remaining(&self) -> usize {
        self.blocks.len()
    }
}

impl BlockSource for MemoryTape {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<BlockRead> {
        match self.blocks.front() {
            None | Some(MemoryBlock::Mark) => {
                self.blocks.pop_front();
                Ok(BlockRead::Eof)
            }
            Some(MemoryBlock::Data(data)) => {
                let len = data.len();
                if len > buf.len() {
                    return Err(DecodeError::Device(Error::new(
                        ErrorKind::InvalidData,
                        "block larger than read buffer",
                    )));
                }
                buf[..len].copy_from_slice(data);
                self.blocks.pop_front();
                Ok(BlockRead::Data(len))
            }
            Some(MemoryBlock::EndOfTape) => {
                self.at_end_of_tape = true;
                Err(DecodeError::Device(Error::other("end of tape")))
            }
            Some(MemoryBlock::Fault) => {
                self.blocks.pop_front();
                Err(DecodeError::Device(Error::from(ErrorKind::InvalidData)))
            }
        }
    }
}

impl TapeControl for MemoryTape {
    fn at_end_of_tape(&mut self) -> Result<bool> {
        Ok(self.at_end_of_tape)
    }

    fn rewind(&mut self) -> Result<()> {
        if self.at_end_of_tape {
            self.blocks.pop_front();
            self.at_end_of_tape = false;
        }
        self.rewinds += 1;
        Ok(())
    }
}
