//! The MAGSAV record state machine.
//!
//! A save tape is laid out as:
//!
//! ```text
//! header  EOF  { treename password | treename data* }*  end-of-tape  EOF  EOF
//! ```
//!
//! where a treename record names a file or directory, a file's treename is followed by its data
//! records, and anything else is followed by a single (ignored) password record.  [`Session`]
//! reads blocks one at a time and drives [`ParseState`] through that grammar, creating
//! directories and files as it goes.

use std::{fmt, io::Write, path::PathBuf};

use log::{debug, trace};
use rustix::fs::Mode;

use crate::{
    block::BlockSource,
    error::{DecodeError, Result},
    expand::Expander,
    format::{FileKind, BLOCK_SIZE},
    limits::Limits,
    output::OutputFs,
    path::{candidate_path, output_path, PatternSet, Resolution},
    record::{DirectoryRecord, Record, TreeEntry, VolumeHeader},
};

/// Where the decoder is in the record grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseState {
    /// Expecting the volume header.
    Init,
    /// Expecting the tape mark after the header.
    ExpectEof,
    /// Expecting a treename record or end-of-tape.
    Entry,
    /// Expecting the password record after a directory's treename.
    PasswordCheck,
    /// Inside a file: expecting data, the next treename, or end-of-tape.
    Data,
    /// After end-of-tape: expecting `remaining` more tape marks.
    EotCheck { remaining: u8 },
    Done,
}

impl fmt::Display for ParseState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "INIT",
            Self::ExpectEof => "EXPECT_EOF",
            Self::Entry => "ENTRY",
            Self::PasswordCheck => "PASSWORD_CHECK",
            Self::Data => "DATA",
            Self::EotCheck { .. } => "EOT_CHECK",
            Self::Done => "DONE",
        })
    }
}

/// How to decode.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Only list matching entries; create nothing.
    pub list_only: bool,
    /// List matching entries (with protection and date) while extracting.
    pub verbose: bool,
    /// Map tape protections to file modes instead of using 0644.
    pub preserve_permissions: bool,
    /// Clear the high bit of every data byte before expanding it.
    pub strip_parity: bool,
    pub limits: Limits,
}

/// What a decoding run did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub header: Option<VolumeHeader>,
    /// Matching files (created, or listed in list-only mode).
    pub files: usize,
    /// Matching directories.
    pub directories: usize,
    /// Matching entries of other types, which are never extracted.
    pub skipped: usize,
    /// Targets that matched nothing on the tape.
    pub missing: Vec<String>,
    /// Decoding stopped because no target could match anything further.
    pub stopped_early: bool,
}

struct OutputTarget<W> {
    path: PathBuf,
    file: W,
}

/// Everything the state machine carries from one record to the next.
struct Context<F: OutputFs, L> {
    state: ParseState,
    options: Options,
    patterns: PatternSet,
    fs: F,
    listing: L,
    output: Option<OutputTarget<F::File>>,
    /// Whether the current treename was selected by a target.
    accepted: bool,
    expander: Expander,
    summary: Summary,
}

/// What processing a treename record led to.
enum Entered {
    Kind(FileKind),
    Exhausted,
}

impl<F: OutputFs, L: Write> Context<F, L> {
    /// Applies one record to the current state and returns the next state.
    fn transition(&mut self, record: Record) -> Result<ParseState> {
        use ParseState::*;

        Ok(match (self.state, record) {
            (Init, Record::Header(header)) => {
                writeln!(self.listing, "{header}").map_err(DecodeError::Listing)?;
                self.summary.header = Some(header);
                ExpectEof
            }
            (ExpectEof, Record::Eof) => Entry,
            (Entry | Data, Record::EndOfTape) => {
                self.close_output()?;
                EotCheck { remaining: 2 }
            }
            (Entry | Data, Record::Directory(dir)) => match self.enter(&dir)? {
                Entered::Exhausted => {
                    self.summary.stopped_early = true;
                    Done
                }
                Entered::Kind(FileKind::File) => Data,
                Entered::Kind(_) => PasswordCheck,
            },
            (PasswordCheck, Record::Data(_)) => Entry,
            (Data, Record::Data(payload)) => {
                self.write_data(payload)?;
                Data
            }
            (EotCheck { remaining: 1 }, Record::Eof) => Done,
            (EotCheck { remaining }, Record::Eof) => EotCheck {
                remaining: remaining - 1,
            },
            (state @ EotCheck { .. }, _) => {
                return Err(DecodeError::format(state, "missing EOF after EOT record"))
            }
            (state, record) => {
                return Err(DecodeError::format(
                    state,
                    format!("unexpected {}", record.kind()),
                ))
            }
        })
    }

    /// Resolves a treename record against the targets and creates what it names.
    fn enter(&mut self, dir: &DirectoryRecord) -> Result<Entered> {
        let candidate = candidate_path(dir, &self.options.limits)?;
        trace!("treename record {}: {candidate}", dir.seqnum());

        let accepted = match self.patterns.resolve(&candidate) {
            Resolution::Exhausted => {
                debug!("all targets done at {candidate}; stopping");
                return Ok(Entered::Exhausted);
            }
            Resolution::Accepted(path) => Some(path),
            Resolution::Rejected => None,
        };

        let leaf = dir.leaf();
        self.close_output()?;
        self.accepted = accepted.is_some();

        let Some(path) = accepted else {
            return Ok(Entered::Kind(leaf.kind));
        };

        let extract = !self.options.list_only;
        match leaf.kind {
            FileKind::File => {
                self.expander.reset();
                if extract {
                    self.open_output(&path, &leaf)?;
                }
                self.summary.files += 1;
            }
            FileKind::Directory => {
                if extract {
                    let out = output_path(&path)?;
                    self.fs
                        .create_dir_all(&out)
                        .map_err(|source| DecodeError::CreateDirectory { path: out, source })?;
                }
                self.summary.directories += 1;
            }
            FileKind::Other(code) => {
                debug!("not extracting {path}: file type {code}");
                self.summary.skipped += 1;
            }
        }

        self.list(&path, &leaf)?;
        Ok(Entered::Kind(leaf.kind))
    }

    fn list(&mut self, path: &str, leaf: &TreeEntry) -> Result<()> {
        let written = if self.options.verbose {
            writeln!(
                self.listing,
                "{:<9} {} {path}",
                leaf.protection.to_string(),
                leaf.mod_date
            )
        } else if self.options.list_only {
            writeln!(self.listing, "{path}")
        } else {
            Ok(())
        };
        written.map_err(DecodeError::Listing)
    }

    fn open_output(&mut self, path: &str, leaf: &TreeEntry) -> Result<()> {
        let path = output_path(path)?;
        let mode: Mode = leaf
            .protection
            .to_mode(self.options.preserve_permissions);

        let file = self
            .fs
            .create_file(&path, mode)
            .map_err(|source| DecodeError::CreateFile {
                path: path.clone(),
                source,
            })?;
        self.output = Some(OutputTarget { path, file });
        Ok(())
    }

    fn write_data(&mut self, payload: &[u8]) -> Result<()> {
        if !self.accepted {
            return Ok(());
        }
        let Some(target) = &mut self.output else {
            // list-only
            return Ok(());
        };

        self.expander
            .expand(payload, &mut target.file)
            .map_err(|source| DecodeError::Write {
                path: target.path.clone(),
                source,
            })
    }

    fn close_output(&mut self) -> Result<()> {
        if let Some(mut target) = self.output.take() {
            target.file.flush().map_err(|source| DecodeError::Write {
                path: target.path.clone(),
                source,
            })?;
            debug!("closed {}", target.path.display());
        }
        Ok(())
    }
}

/// A decoding run over one logical tape.
pub struct Session<S, F: OutputFs, L> {
    source: S,
    block: Box<[u8]>,
    ctx: Context<F, L>,
}

impl<S: BlockSource, F: OutputFs, L: Write> Session<S, F, L> {
    /// Sets up a run reading from `source`, creating entries in `fs`, and printing the volume
    /// header and listing to `listing`.
    pub fn new(source: S, fs: F, listing: L, patterns: PatternSet, options: Options) -> Self {
        let expander = Expander::new().strip_parity(options.strip_parity);
        Self {
            source,
            block: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
            ctx: Context {
                state: ParseState::Init,
                options,
                patterns,
                fs,
                listing,
                output: None,
                accepted: false,
                expander,
                summary: Summary::default(),
            },
        }
    }

    pub fn state(&self) -> ParseState {
        self.ctx.state
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.ctx.patterns
    }

    /// Reads and processes one block.  Does nothing once the run is done.
    pub fn step(&mut self) -> Result<ParseState> {
        let state = self.ctx.state;
        if state == ParseState::Done {
            return Ok(state);
        }

        let read = self.source.read_block(&mut self.block)?;
        let block = &self.block[..read.len()];

        let record = match state {
            ParseState::Init if !read.is_eof() => Record::header(block, state)?,
            _ => Record::classify(block, state, &self.ctx.options.limits)?,
        };
        trace!("{state}: {}", record.kind());

        let next = self.ctx.transition(record)?;
        if next != state {
            debug!("{state} -> {next}");
        }
        self.ctx.state = next;
        Ok(next)
    }

    /// Decodes to the end of the tape (or until no target can match anything further).
    ///
    /// When stopping early the trailing end-of-tape records are not read.
    pub fn run(mut self) -> Result<Summary> {
        while self.step()? != ParseState::Done {}
        self.finish()
    }

    /// Closes any open output and reports the targets that never matched.
    pub fn finish(mut self) -> Result<Summary> {
        self.ctx.close_output()?;
        self.ctx.listing.flush().map_err(DecodeError::Listing)?;

        let mut summary = std::mem::take(&mut self.ctx.summary);
        summary.missing = self.ctx.patterns.missing().map(String::from).collect();
        Ok(summary)
    }

    /// Gives back the block source, for callers that want to keep reading or inspect it.
    pub fn into_source(self) -> S {
        self.source
    }
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::{
        block::{MemoryBlock, MemoryTape},
        testutil::{
            compress, data_record, eot_record, header_record, treename_record, MemoryFs, TestEntry,
        },
    };

    fn sample_tape() -> Vec<MemoryBlock> {
        vec![
            MemoryBlock::Data(header_record("SAVE01", "860312", 1, 20)),
            MemoryBlock::Mark,
            MemoryBlock::Data(treename_record(&[TestEntry::dir("DOCS")])),
            MemoryBlock::Data(data_record(b"PW")),
            MemoryBlock::Data(treename_record(&[
                TestEntry::dir("DOCS"),
                TestEntry::file("README"),
            ])),
            MemoryBlock::Data(data_record(&compress(b"hello\nworld"))),
            MemoryBlock::Data(eot_record()),
            MemoryBlock::Mark,
            MemoryBlock::Mark,
        ]
    }

    fn session(
        blocks: Vec<MemoryBlock>,
        patterns: &[&str],
        options: Options,
    ) -> Session<MemoryTape, MemoryFs, Vec<u8>> {
        Session::new(
            MemoryTape::new(blocks),
            MemoryFs::default(),
            vec![],
            PatternSet::new(patterns.iter().copied()),
            options,
        )
    }

    fn listing<S, F: OutputFs>(session: &Session<S, F, Vec<u8>>) -> String {
        String::from_utf8(session.ctx.listing.clone()).unwrap()
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ParseState::Init.to_string(), "INIT");
        assert_eq!(ParseState::PasswordCheck.to_string(), "PASSWORD_CHECK");
        assert_eq!(
            ParseState::EotCheck { remaining: 1 }.to_string(),
            "EOT_CHECK"
        );
    }

    #[test]
    fn test_extract() {
        let mut s = session(sample_tape(), &[], Options::default());
        let fs = s.ctx.fs.clone();

        let mut states = vec![];
        while s.state() != ParseState::Done {
            states.push(s.step().unwrap());
        }
        use ParseState::*;
        assert_eq!(
            states,
            [
                ExpectEof,
                Entry,
                PasswordCheck,
                Entry,
                Data,
                Data,
                EotCheck { remaining: 2 },
                EotCheck { remaining: 1 },
                Done
            ]
        );
        assert_eq!(
            listing(&s),
            "Tape 'SAVE01', Reel 1, Revision 20, Date 860312\n"
        );

        let summary = s.finish().unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.directories, 1);
        assert!(summary.missing.is_empty());
        assert!(!summary.stopped_early);

        assert!(fs.is_dir("docs"));
        assert_eq!(fs.contents("docs/readme").unwrap(), b"hello\nworld");
        assert_eq!(fs.mode("docs/readme").unwrap(), 0o644);
    }

    #[test]
    fn test_list_only() {
        let options = Options {
            list_only: true,
            ..Default::default()
        };
        let mut s = session(sample_tape(), &[], options);
        let fs = s.ctx.fs.clone();
        while s.step().unwrap() != ParseState::Done {}

        assert_eq!(
            listing(&s),
            "Tape 'SAVE01', Reel 1, Revision 20, Date 860312\ndocs\ndocs/readme\n"
        );
        assert!(fs.is_empty());
    }

    #[test]
    fn test_verbose_listing() {
        let options = Options {
            verbose: true,
            ..Default::default()
        };
        let mut s = session(sample_tape(), &[], options);
        while s.step().unwrap() != ParseState::Done {}

        let listing = listing(&s);
        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "rw-/r---  1986-03-12 docs");
        assert_eq!(lines[2], "rw-/r---  1986-03-12 docs/readme");
    }

    #[test]
    fn test_preserve_permissions() {
        let mut tape = sample_tape();
        tape[4] = MemoryBlock::Data(treename_record(&[
            TestEntry::dir("DOCS"),
            TestEntry::file("README").protection(0o1400),
        ]));
        let options = Options {
            preserve_permissions: true,
            ..Default::default()
        };
        let s = session(tape, &[], options);
        let fs = s.ctx.fs.clone();
        s.run().unwrap();
        assert_eq!(fs.mode("docs/readme").unwrap(), 0o600);
    }

    #[test]
    fn test_strip_parity() {
        let high: Vec<u8> = compress(b"hello\nworld").iter().map(|c| c | 0x80).collect();
        let mut tape = sample_tape();
        tape[5] = MemoryBlock::Data(data_record(&high));

        let s = session(tape.clone(), &[], Options::default());
        let fs = s.ctx.fs.clone();
        s.run().unwrap();
        assert_eq!(fs.contents("docs/readme").unwrap(), high);

        let options = Options {
            strip_parity: true,
            ..Default::default()
        };
        let s = session(tape, &[], options);
        let fs = s.ctx.fs.clone();
        s.run().unwrap();
        assert_eq!(fs.contents("docs/readme").unwrap(), b"hello\nworld");
    }

    #[test]
    fn test_missing_target() {
        let s = session(sample_tape(), &["docs", "src"], Options::default());
        let summary = s.run().unwrap();
        assert_eq!(summary.missing, ["src"]);
    }

    #[test]
    fn test_stops_early() {
        let mut tape = sample_tape();
        // a later entry outside the target, then garbage that must never be read
        tape.insert(
            6,
            MemoryBlock::Data(treename_record(&[TestEntry::dir("SRC")])),
        );
        tape.insert(7, MemoryBlock::Fault);

        let mut s = session(tape, &["docs"], Options::default());
        let fs = s.ctx.fs.clone();
        while s.step().unwrap() != ParseState::Done {}
        assert!(s.ctx.summary.stopped_early);
        assert!(!fs.is_dir("src"));
        assert_eq!(fs.contents("docs/readme").unwrap(), b"hello\nworld");

        let tape = s.into_source();
        // fault, end-of-tape and both marks left unread
        assert_eq!(tape.remaining(), 4);
    }

    #[test]
    fn test_rejected_file_data_not_written() {
        let tape = vec![
            MemoryBlock::Data(header_record("T", "", 1, 1)),
            MemoryBlock::Mark,
            MemoryBlock::Data(treename_record(&[TestEntry::file("KEEP")])),
            MemoryBlock::Data(data_record(b"keep\n\0")),
            MemoryBlock::Data(treename_record(&[TestEntry::file("KEEPSAKE")])),
            MemoryBlock::Data(data_record(b"nope")),
            MemoryBlock::Data(treename_record(&[TestEntry::file("KEEP2")])),
            MemoryBlock::Data(eot_record()),
            MemoryBlock::Mark,
            MemoryBlock::Mark,
        ];
        let s = session(tape, &["keep", "keep2"], Options::default());
        let fs = s.ctx.fs.clone();
        let summary = s.run().unwrap();

        assert_eq!(fs.contents("keep").unwrap(), b"keep\n");
        assert!(fs.contents("keepsake").is_none());
        assert_eq!(fs.contents("keep2").unwrap(), b"");
        assert_eq!(summary.files, 2);
    }

    #[test]
    fn test_other_file_type() {
        let tape = vec![
            MemoryBlock::Data(header_record("T", "", 1, 1)),
            MemoryBlock::Mark,
            MemoryBlock::Data(treename_record(&[TestEntry::other("SEGDIR", 2)])),
            MemoryBlock::Data(data_record(b"")),
            MemoryBlock::Data(eot_record()),
            MemoryBlock::Mark,
            MemoryBlock::Mark,
        ];
        let s = session(tape, &[], Options::default());
        let fs = s.ctx.fs.clone();
        let summary = s.run().unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(fs.is_empty());
    }

    #[test]
    fn test_format_errors() {
        // no EOF after the header
        let mut tape = sample_tape();
        tape.remove(1);
        let err = session(tape, &[], Options::default()).run().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format {
                state: ParseState::ExpectEof,
                ..
            }
        ));

        // directory without its password record
        let mut tape = sample_tape();
        tape.remove(3);
        let err = session(tape, &[], Options::default()).run().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format {
                state: ParseState::PasswordCheck,
                ..
            }
        ));

        // data before any treename
        let mut tape = sample_tape();
        tape.insert(2, MemoryBlock::Data(data_record(b"xx")));
        let err = session(tape, &[], Options::default()).run().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format {
                state: ParseState::Entry,
                ..
            }
        ));

        // only one EOF after end-of-tape, then data
        let mut tape = sample_tape();
        tape[8] = MemoryBlock::Data(data_record(b"xx"));
        let err = session(tape, &[], Options::default()).run().unwrap_err();
        assert_eq!(
            err.to_string(),
            "misformatted MAGSAV tape in state EOT_CHECK: missing EOF after EOT record"
        );

        // empty tape
        let err = session(vec![], &[], Options::default())
            .run()
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format {
                state: ParseState::Init,
                ..
            }
        ));
    }

    #[test]
    fn test_unsafe_path() {
        let mut tape = sample_tape();
        tape[4] = MemoryBlock::Data(treename_record(&[
            TestEntry::dir("DOCS"),
            TestEntry::file(".."),
        ]));
        let err = session(tape, &[], Options::default()).run().unwrap_err();
        assert!(matches!(err, DecodeError::UnsafePath(_)));
    }

    #[test]
    fn test_step_after_done() {
        let mut s = session(sample_tape(), &[], Options::default());
        while s.step().unwrap() != ParseState::Done {}
        assert_eq!(s.step().unwrap(), ParseState::Done);
    }
}
