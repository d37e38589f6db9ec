//! Builders for synthetic MAGSAV tapes, used by the tests.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    io::{self, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use rustix::fs::Mode;
use zerocopy::{big_endian::U16, IntoBytes};

use crate::{
    block::MemoryBlock,
    format::{
        RecordPrefix, TreeEntryRaw, VolumeHeaderRaw, BLANK_ESCAPE, ENTRY_NAME_SIZE,
        FILE_TYPE_DAM, FILE_TYPE_UFD, RECORD_PREFIX_WORDS, RECORD_TYPE_DATA,
        RECORD_TYPE_END_OF_TAPE, RECORD_TYPE_TREENAME, TREE_ENTRY_WORDS, VOLUME_HEADER_SIZE,
    },
    output::OutputFs,
};

/// Pads `text` with spaces to `N` bytes, setting the parity bit like the tape writer does.
fn tape_text<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [b' ' | 0x80; N];
    for (dst, src) in field.iter_mut().zip(text.bytes()) {
        *dst = src | 0x80;
    }
    field
}

pub fn header_record(name: &str, date: &str, reel: u16, revision: u16) -> Vec<u8> {
    VolumeHeaderRaw {
        seqnum: U16::new(1),
        length: U16::new((VOLUME_HEADER_SIZE / 2) as u16),
        id: U16::ZERO,
        class: U16::ZERO,
        date: tape_text(date),
        revision: U16::new(revision),
        reel: U16::new(reel),
        name: tape_text(name),
    }
    .as_bytes()
    .to_vec()
}

fn prefix(rectype: u16, words: usize) -> RecordPrefix {
    RecordPrefix {
        seqnum: U16::ZERO,
        length: U16::new(words as u16),
        rectype: U16::new(rectype),
    }
}

/// A data record carrying `payload`, which must be a whole number of words.
pub fn data_record(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() % 2 == 0, "data payload must have even length");
    let mut block = prefix(RECORD_TYPE_DATA, RECORD_PREFIX_WORDS + payload.len() / 2)
        .as_bytes()
        .to_vec();
    block.extend_from_slice(payload);
    block
}

pub fn eot_record() -> Vec<u8> {
    prefix(RECORD_TYPE_END_OF_TAPE, RECORD_PREFIX_WORDS)
        .as_bytes()
        .to_vec()
}

/// One path component for [`treename_record`].
#[derive(Clone, Debug)]
pub struct TestEntry {
    name: String,
    file_type: u8,
    protection: u16,
    mod_date: u16,
}

impl TestEntry {
    pub fn other(name: &str, file_type: u8) -> Self {
        Self {
            name: name.to_string(),
            file_type,
            // owner read/write, non-owner read
            protection: 0o1401,
            // 1986-03-12
            mod_date: (86 << 9) | (3 << 5) | 12,
        }
    }

    pub fn file(name: &str) -> Self {
        Self::other(name, FILE_TYPE_DAM)
    }

    pub fn dir(name: &str) -> Self {
        Self::other(name, FILE_TYPE_UFD)
    }

    pub fn protection(mut self, protection: u16) -> Self {
        self.protection = protection;
        self
    }

    fn raw(&self) -> TreeEntryRaw {
        TreeEntryRaw {
            entry_type: 0,
            unused1: 0,
            name: tape_text::<ENTRY_NAME_SIZE>(&self.name),
            protection: U16::new(self.protection),
            acl_protection: U16::ZERO,
            unused2: 0,
            file_type: self.file_type,
            mod_date: U16::new(self.mod_date),
            mod_time: U16::ZERO,
            unused3: [0; 4],
        }
    }
}

pub fn treename_record(entries: &[TestEntry]) -> Vec<u8> {
    let words = RECORD_PREFIX_WORDS + entries.len() * TREE_ENTRY_WORDS;
    let mut block = prefix(RECORD_TYPE_TREENAME, words).as_bytes().to_vec();
    for entry in entries {
        block.extend_from_slice(entry.raw().as_bytes());
    }
    block
}

/// Blank-compresses and pads `text` the way the tape writer does.
///
/// Runs of three or more spaces become escape sequences, and a newline at an even offset is
/// followed by a pad byte.  If the result has odd length it ends with a lone escape byte, which
/// expands to nothing.
pub fn compress(text: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    let mut i = 0;
    while i < text.len() {
        let run = text[i..]
            .iter()
            .take(255)
            .take_while(|&&c| c == b' ')
            .count();
        if run >= 3 {
            out.extend_from_slice(&[BLANK_ESCAPE, run as u8]);
            i += run;
            continue;
        }

        out.push(text[i]);
        if text[i] == b'\n' && (out.len() - 1) % 2 == 0 {
            out.push(0);
        }
        i += 1;
    }

    if out.len() % 2 != 0 {
        out.push(BLANK_ESCAPE);
    }
    out
}

/// Encodes blocks as a SIMH `.tap` image.
pub fn tap_image(blocks: &[MemoryBlock]) -> Vec<u8> {
    let mut image = vec![];
    for block in blocks {
        match block {
            MemoryBlock::Data(data) => {
                let len = (data.len() as u32).to_le_bytes();
                image.extend_from_slice(&len);
                image.extend_from_slice(data);
                if data.len() % 2 != 0 {
                    image.push(0);
                }
                image.extend_from_slice(&len);
            }
            MemoryBlock::Mark => image.extend_from_slice(&0u32.to_le_bytes()),
            MemoryBlock::EndOfTape | MemoryBlock::Fault => {
                panic!("{block:?} can't be stored in an image")
            }
        }
    }
    image.extend_from_slice(&u32::MAX.to_le_bytes());
    image
}

/// A file in a [`MemoryFs`]; clones share contents.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum MemoryNode {
    Directory,
    File { mode: u32, contents: SharedBuffer },
}

/// An in-memory [`OutputFs`]; clones share the same tree.
#[derive(Clone, Debug, Default)]
pub struct MemoryFs {
    nodes: Rc<RefCell<BTreeMap<PathBuf, MemoryNode>>>,
}

impl MemoryFs {
    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        matches!(
            self.nodes.borrow().get(path.as_ref()),
            Some(MemoryNode::Directory)
        )
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.nodes.borrow().get(path.as_ref()) {
            Some(MemoryNode::File { contents, .. }) => Some(contents.0.borrow().clone()),
            _ => None,
        }
    }

    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        match self.nodes.borrow().get(path.as_ref()) {
            Some(MemoryNode::File { mode, .. }) => Some(*mode),
            _ => None,
        }
    }

    /// All paths, in order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.nodes.borrow().keys().cloned().collect()
    }
}

impl OutputFs for MemoryFs {
    type File = SharedBuffer;

    fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        let mut ancestors: Vec<_> = path
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        ancestors.reverse();
        for ancestor in ancestors {
            match nodes.get(ancestor) {
                Some(MemoryNode::File { .. }) => {
                    return Err(io::Error::from(io::ErrorKind::NotADirectory))
                }
                Some(MemoryNode::Directory) => {}
                None => {
                    nodes.insert(ancestor.to_path_buf(), MemoryNode::Directory);
                }
            }
        }
        Ok(())
    }

    fn create_file(&mut self, path: &Path, mode: Mode) -> io::Result<SharedBuffer> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }

        let contents = SharedBuffer::default();
        let mut nodes = self.nodes.borrow_mut();
        if let Some(MemoryNode::Directory) = nodes.get(path) {
            return Err(io::Error::from(io::ErrorKind::IsADirectory));
        }
        nodes.insert(
            path.to_path_buf(),
            MemoryNode::File {
                mode: mode.as_raw_mode(),
                contents: contents.clone(),
            },
        );
        Ok(contents)
    }
}
