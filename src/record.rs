//! Classification of raw tape blocks into MAGSAV records.

use std::fmt;

use zerocopy::FromBytes;

use crate::{
    error::{DecodeError, Result},
    format::{
        text_field, FileKind, ModDate, RecordPrefix, TreeEntryRaw, VolumeHeaderRaw,
        RECORD_PREFIX_SIZE, RECORD_PREFIX_WORDS, RECORD_TYPE_DATA, RECORD_TYPE_END_OF_TAPE,
        RECORD_TYPE_TREENAME, TREE_ENTRY_WORDS,
    },
    limits::Limits,
    protection::Protection,
    session::ParseState,
};

/// The volume header at the start of a tape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeHeader {
    pub seqnum: u16,
    pub reel: u16,
    pub revision: u16,
    pub name: String,
    pub date: String,
}

impl VolumeHeader {
    pub fn parse(block: &[u8], state: ParseState) -> Result<Self> {
        let (raw, _) = VolumeHeaderRaw::read_from_prefix(block).map_err(|_| {
            DecodeError::format(
                state,
                format!("volume header needs 24 bytes, block has {}", block.len()),
            )
        })?;

        Ok(Self {
            seqnum: raw.seqnum.get(),
            reel: raw.reel.get(),
            revision: raw.revision.get(),
            name: text_field(&raw.name),
            date: text_field(&raw.date),
        })
    }
}

impl fmt::Display for VolumeHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Tape '{}', Reel {}, Revision {}, Date {}",
            self.name, self.reel, self.revision, self.date
        )
    }
}

/// One decoded path component of a treename record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub entry_type: u8,
    /// The name as recorded: parity removed, cut at the first space, case preserved.
    pub name: String,
    pub protection: Protection,
    pub acl_protection: u16,
    pub kind: FileKind,
    pub mod_date: ModDate,
    pub mod_time: u16,
}

impl From<&TreeEntryRaw> for TreeEntry {
    fn from(raw: &TreeEntryRaw) -> Self {
        Self {
            entry_type: raw.entry_type,
            name: text_field(&raw.name),
            protection: Protection(raw.protection.get()),
            acl_protection: raw.acl_protection.get(),
            kind: FileKind::from(raw.file_type),
            mod_date: ModDate(raw.mod_date.get()),
            mod_time: raw.mod_time.get(),
        }
    }
}

/// A treename record: the path from the top of the save down to one file or directory.
#[derive(Clone, Copy, Debug)]
pub struct DirectoryRecord<'a> {
    seqnum: u16,
    entries: &'a [TreeEntryRaw],
}

impl<'a> DirectoryRecord<'a> {
    pub fn seqnum(&self) -> u16 {
        self.seqnum
    }

    /// Number of path components.  Never zero.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = TreeEntry> + 'a {
        self.entries.iter().map(TreeEntry::from)
    }

    /// The last component: the file or directory this record describes.
    pub fn leaf(&self) -> TreeEntry {
        // classify() never produces an empty record
        TreeEntry::from(&self.entries[self.entries.len() - 1])
    }
}

/// One classified tape record, borrowing from the block it was read into.
#[derive(Clone, Debug)]
pub enum Record<'a> {
    Header(VolumeHeader),
    /// A zero-length block (tape mark).
    Eof,
    Directory(DirectoryRecord<'a>),
    /// A data record's payload bytes.
    Data(&'a [u8]),
    EndOfTape,
}

impl<'a> Record<'a> {
    /// Interprets the first block of a volume.
    pub fn header(block: &[u8], state: ParseState) -> Result<Record<'a>> {
        Ok(Record::Header(VolumeHeader::parse(block, state)?))
    }

    /// Interprets any block after the volume header.
    ///
    /// `block` must be exactly the bytes read.  All lengths recorded in the block are checked
    /// against its size and against `limits`.
    pub fn classify(block: &'a [u8], state: ParseState, limits: &Limits) -> Result<Record<'a>> {
        if block.is_empty() {
            return Ok(Record::Eof);
        }

        let Ok((prefix, _)) = RecordPrefix::ref_from_prefix(block) else {
            return Err(DecodeError::format(
                state,
                format!("{} byte block is too short for a record", block.len()),
            ));
        };

        match prefix.rectype.get() {
            RECORD_TYPE_DATA => {
                let bytes = record_bytes(prefix, block, state)?;
                Ok(Record::Data(&block[RECORD_PREFIX_SIZE..bytes]))
            }
            RECORD_TYPE_TREENAME => {
                record_bytes(prefix, block, state)?;
                let count = (prefix.length.get() as usize - RECORD_PREFIX_WORDS) / TREE_ENTRY_WORDS;
                if count == 0 {
                    return Err(DecodeError::format(state, "treename record without entries"));
                }
                if count > limits.max_entries {
                    return Err(DecodeError::TooManyEntries {
                        count,
                        limit: limits.max_entries,
                    });
                }

                let (entries, _) = <[TreeEntryRaw]>::ref_from_prefix_with_elems(
                    &block[RECORD_PREFIX_SIZE..],
                    count,
                )
                .map_err(|_| {
                    DecodeError::format(
                        state,
                        format!("{count} tree entries don't fit in a {} byte block", block.len()),
                    )
                })?;

                Ok(Record::Directory(DirectoryRecord {
                    seqnum: prefix.seqnum.get(),
                    entries,
                }))
            }
            RECORD_TYPE_END_OF_TAPE => Ok(Record::EndOfTape),
            other => Err(DecodeError::format(
                state,
                format!("illegal record type {other}"),
            )),
        }
    }

    /// Short name for messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Header(_) => "header",
            Record::Eof => "EOF mark",
            Record::Directory(_) => "treename record",
            Record::Data(_) => "data record",
            Record::EndOfTape => "end-of-tape record",
        }
    }
}

/// Validates the prefix's length field against the block and returns the record size in bytes.
fn record_bytes(prefix: &RecordPrefix, block: &[u8], state: ParseState) -> Result<usize> {
    let words = prefix.length.get() as usize;
    if words < RECORD_PREFIX_WORDS {
        return Err(DecodeError::format(
            state,
            format!("record length {words} is shorter than its prefix"),
        ));
    }

    let bytes = 2 * words;
    if bytes > block.len() {
        return Err(DecodeError::format(
            state,
            format!(
                "record length {words} words exceeds the {} bytes read",
                block.len()
            ),
        ));
    }

    Ok(bytes)
}
