//! Where extracted files and directories go.

use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::debug;
use rustix::{
    fd::OwnedFd,
    fs::{mkdirat, openat, Mode, OFlags, CWD},
    io::Errno,
};

/// The filesystem operations extraction needs.
///
/// Paths are always relative, and have already been checked by [`crate::path::output_path`].
pub trait OutputFs {
    type File: Write;

    /// Creates a directory and any missing parents.  Existing directories are fine.
    fn create_dir_all(&mut self, path: &Path) -> io::Result<()>;

    /// Creates (or truncates) a file with the given mode, creating missing parent directories.
    fn create_file(&mut self, path: &Path, mode: Mode) -> io::Result<Self::File>;
}

/// Writes below a directory on the host filesystem.
#[derive(Debug)]
pub struct HostFs {
    root: OwnedFd,
    root_path: PathBuf,
}

impl HostFs {
    /// Opens `root` as the extraction root.  It must already exist.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        let fd = openat(
            CWD,
            root,
            OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;
        Ok(Self {
            root: fd,
            root_path: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }
}

impl OutputFs for HostFs {
    type File = File;

    fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
        let mut partial = PathBuf::new();
        for component in path.components() {
            partial.push(component);
            match mkdirat(&self.root, partial.as_path(), Mode::from_raw_mode(0o777)) {
                Ok(()) => debug!("created directory {}", partial.display()),
                Err(Errno::EXIST) => {}
                Err(e) => Err(e)?,
            }
        }
        Ok(())
    }

    fn create_file(&mut self, path: &Path, mode: Mode) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }

        let fd = openat(
            &self.root,
            path,
            OFlags::CREATE | OFlags::WRONLY | OFlags::TRUNC | OFlags::CLOEXEC,
            mode,
        )?;
        debug!("created {} mode {:o}", path.display(), mode.as_raw_mode());
        Ok(File::from(fd))
    }
}
