//! Magnetic tape device access.
//!
//! This module opens a tape device node and provides the two control operations the decoder needs
//! for multi-volume tapes: asking the drive whether it is sitting at end-of-tape, and rewinding
//! it.  Both are issued with the Linux `mtio` ioctls.

#![allow(unsafe_code)]

use std::{
    ffi::{c_int, c_long, c_short},
    fs::File,
    io::{self, ErrorKind, Read},
    os::fd::AsFd,
    path::{Path, PathBuf},
};

use log::{debug, trace};
use rustix::{
    fs::{open, Mode, OFlags},
    ioctl::{ioctl, opcode, Opcode, Setter, Updater},
};

use crate::{
    block::{BlockRead, BlockSource},
    error::{DecodeError, Result},
};

/// Device nodes must live under this directory.
pub const DEVICE_PREFIX: &str = "/dev/";

/// The default no-rewind tape device.
pub const DEFAULT_DEVICE: &str = "/dev/nst0";

/// Positioning control of a tape drive.
pub trait TapeControl {
    /// Whether the last failed operation was caused by the drive reaching end-of-tape.
    fn at_end_of_tape(&mut self) -> Result<bool>;

    /// Rewinds the tape to its beginning.
    fn rewind(&mut self) -> Result<()>;
}

// See /usr/include/linux/mtio.h
#[repr(C)]
#[derive(Debug)]
struct MtOp {
    mt_op: c_short,
    mt_count: c_int,
}

#[repr(C)]
#[derive(Debug, Default)]
struct MtGet {
    mt_type: c_long,
    mt_resid: c_long,
    mt_dsreg: c_long,
    mt_gstat: c_long,
    mt_erreg: c_long,
    mt_fileno: c_int,
    mt_blkno: c_int,
}

// #define MTIOCTOP _IOW('m', 1, struct mtop)
const MTIOCTOP: Opcode = opcode::write::<MtOp>(b'm', 1);
// #define MTIOCGET _IOR('m', 2, struct mtget)
const MTIOCGET: Opcode = opcode::read::<MtGet>(b'm', 2);

const MTREW: c_short = 6;
// #define GMT_EOT(x) ((x) & 0x20000000)
const GMT_EOT: c_long = 0x2000_0000;

fn mt_status(fd: impl AsFd) -> io::Result<MtGet> {
    let mut status = MtGet::default();
    unsafe { ioctl(fd, Updater::<{ MTIOCGET }, MtGet>::new(&mut status)) }?;
    Ok(status)
}

fn mt_operation(fd: impl AsFd, mt_op: c_short, mt_count: c_int) -> io::Result<()> {
    unsafe { ioctl(fd, Setter::<{ MTIOCTOP }, MtOp>::new(MtOp { mt_op, mt_count })) }
        .map_err(io::Error::from)
}

/// A tape drive opened for reading.
#[derive(Debug)]
pub struct TapeDevice {
    file: File,
    path: PathBuf,
}

impl TapeDevice {
    /// Opens the device node read-only.
    ///
    /// The path must be under `/dev/`; anything else is refused with `ErrorKind::InvalidInput`
    /// before it is touched.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if !path.starts_with(DEVICE_PREFIX) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not under {DEVICE_PREFIX}", path.display()),
            ));
        }

        let fd = open(path, OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty())?;
        debug!("opened tape device {}", path.display());
        Ok(Self {
            file: File::from(fd),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockSource for TapeDevice {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<BlockRead> {
        loop {
            match self.file.read(buf) {
                Ok(0) => return Ok(BlockRead::Eof),
                Ok(n) => {
                    trace!("read {n} byte block from {}", self.path.display());
                    return Ok(BlockRead::Data(n));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(DecodeError::Device(e)),
            }
        }
    }
}

impl TapeControl for TapeDevice {
    fn at_end_of_tape(&mut self) -> Result<bool> {
        let status = mt_status(&self.file).map_err(DecodeError::Device)?;
        trace!("{}: {status:?}", self.path.display());
        Ok(status.mt_gstat & GMT_EOT != 0)
    }

    fn rewind(&mut self) -> Result<()> {
        debug!("rewinding {}", self.path.display());
        mt_operation(&self.file, MTREW, 1).map_err(DecodeError::Device)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_open_outside_dev() {
        let err = TapeDevice::open("/tmp/not-a-tape").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = TapeDevice::open("dev/nst0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_not_a_tape() {
        // /dev/null reads as an immediate tape mark but refuses tape ioctls
        let Ok(mut dev) = TapeDevice::open("/dev/null") else {
            return;
        };
        let mut buf = [0u8; 16];
        assert_eq!(dev.read_block(&mut buf).unwrap(), BlockRead::Eof);
        assert!(matches!(dev.at_end_of_tape(), Err(DecodeError::Device(_))));
    }
}
