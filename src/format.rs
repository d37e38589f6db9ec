//! MAGSAV on-tape format definitions.
//!
//! All multi-byte integers on a MAGSAV tape are big-endian 16-bit words.  Record lengths are
//! counted in words and include the three-word record prefix (sequence, length, type).  Text
//! fields are 7-bit ASCII with the high ("parity") bit set by the recording machine, padded on
//! the right with spaces.

use std::fmt;

use zerocopy::{big_endian::U16, FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of the largest physical tape block we ever read.
pub const BLOCK_SIZE: usize = 4096;

/// Blank compression escape (DC1, ^Q): the following byte is a count of spaces.
pub const BLANK_ESCAPE: u8 = 0o21;

/// Masks off the parity bit of a text byte.
pub const PARITY_MASK: u8 = 0o177;

pub const RECORD_TYPE_DATA: u16 = 1;
pub const RECORD_TYPE_TREENAME: u16 = 2;
pub const RECORD_TYPE_END_OF_TAPE: u16 = 5;

pub const TAPE_NAME_SIZE: usize = 6;
pub const TAPE_DATE_SIZE: usize = 6;
pub const ENTRY_NAME_SIZE: usize = 32;

/// Record prefix shared by every record following the volume header.
#[derive(Clone, Copy, Debug, Default, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct RecordPrefix {
    pub seqnum: U16,
    pub length: U16,
    pub rectype: U16,
}

pub const RECORD_PREFIX_SIZE: usize = size_of::<RecordPrefix>();

/// The first record on every volume.
#[derive(Clone, Copy, Debug, Default, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct VolumeHeaderRaw {
    pub seqnum: U16,
    pub length: U16,
    pub id: U16,
    pub class: U16,
    pub date: [u8; TAPE_DATE_SIZE],
    pub revision: U16,
    pub reel: U16,
    pub name: [u8; TAPE_NAME_SIZE],
}

pub const VOLUME_HEADER_SIZE: usize = size_of::<VolumeHeaderRaw>();

/// One path component in a treename record.
#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct TreeEntryRaw {
    pub entry_type: u8,
    pub unused1: u8,
    pub name: [u8; ENTRY_NAME_SIZE],
    pub protection: U16,
    pub acl_protection: U16,
    pub unused2: u8,
    pub file_type: u8,
    pub mod_date: U16,
    pub mod_time: U16,
    pub unused3: [u8; 4],
}

pub const TREE_ENTRY_SIZE: usize = size_of::<TreeEntryRaw>();

/// Stride of one tree entry, in the words the length field is counted in.
pub const TREE_ENTRY_WORDS: usize = TREE_ENTRY_SIZE / 2;

/// Length field value (in words) taken up by the record prefix.
pub const RECORD_PREFIX_WORDS: usize = RECORD_PREFIX_SIZE / 2;

pub const FILE_TYPE_SAM: u8 = 0;
pub const FILE_TYPE_DAM: u8 = 1;
pub const FILE_TYPE_UFD: u8 = 4;
pub const FILE_TYPE_ACAT: u8 = 5;

/// How a tree entry's file-type code is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Sequential or direct-access file: followed by data records.
    File,
    /// Directory (file directory or access category): followed by a password record.
    Directory,
    /// Anything else (segment directories and friends): skipped, followed by a password record.
    Other(u8),
}

impl From<u8> for FileKind {
    fn from(value: u8) -> Self {
        match value {
            FILE_TYPE_SAM | FILE_TYPE_DAM => Self::File,
            FILE_TYPE_UFD | FILE_TYPE_ACAT => Self::Directory,
            other => Self::Other(other),
        }
    }
}

/// Copies a space-terminated text field, removing the parity bit from each byte.
pub fn text_field(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b & PARITY_MASK)
        .take_while(|&c| c != b' ')
        .map(char::from)
        .collect()
}

/// A modification date word: 7 bits of year since 1900, 4 bits of month, 5 bits of day.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ModDate(pub u16);

impl ModDate {
    pub fn year(self) -> u16 {
        1900 + ((self.0 >> 9) & 0o177)
    }

    pub fn month(self) -> u16 {
        (self.0 >> 5) & 0o17
    }

    pub fn day(self) -> u16 {
        self.0 & 0o37
    }
}

impl fmt::Display for ModDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{:02}-{:02}", self.year(), self.month(), self.day())
    }
}

impl fmt::Debug for ModDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
