//! Reader for PRIME MAGSAV backup tapes.
//!
//! MAGSAV writes a save as a sequence of 16-bit-word records: a volume header, one treename record
//! per saved file or directory giving its full path, and blank-compressed data records following
//! each file.  This crate reads those records from a tape drive (following the save across reels),
//! a SIMH tape image or memory, and recreates the selected subtrees on the host filesystem.
//!
//! ```no_run
//! use magsav::{
//!     block::TapImage,
//!     output::HostFs,
//!     path::PatternSet,
//!     session::{Options, Session},
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let image = TapImage::new(std::fs::File::open("save.tap")?);
//! let root = HostFs::open(".")?;
//! let summary = Session::new(
//!     image,
//!     root,
//!     std::io::stdout(),
//!     PatternSet::new(["src/lib"]),
//!     Options::default(),
//! )
//! .run()?;
//! println!("{} files", summary.files);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod block;
pub mod error;
pub mod expand;
pub mod format;
pub mod limits;
pub mod output;
pub mod path;
pub mod protection;
pub mod record;
pub mod session;
pub mod tape;
pub mod volume;

// Synthetic tape builders, shared with the integration tests
#[doc(hidden)]
pub mod testutil;

pub use error::{DecodeError, Result};
