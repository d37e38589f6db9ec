//! Bounds applied to lengths read from the tape.

/// Bounds applied to lengths read from the tape.
///
/// Every length on a MAGSAV tape is under the control of whoever (or whatever) wrote the tape,
/// so record contents are checked against these before any path is built from them.
///
/// # Example
///
/// ```
/// use magsav::limits::Limits;
///
/// let limits = Limits {
///     max_path_len: 1024,
///     ..Default::default()
/// };
/// assert_eq!(limits.max_entries, Limits::default().max_entries);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum length in bytes of a path reconstructed from a treename record.
    ///
    /// Default: 4096 bytes (Linux PATH_MAX).
    pub max_path_len: usize,

    /// Maximum number of tree entries (directory depth) in one treename record.
    ///
    /// A 4096-byte block can't carry more than 85 entries anyway; this is a tighter bound on
    /// nesting.
    ///
    /// Default: 64.
    pub max_entries: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_path_len: 4096,
            max_entries: 64,
        }
    }
}

impl Limits {
    /// Create a new `Limits` with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits that only enforce what a single block can physically hold.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            max_path_len: usize::MAX,
            max_entries: usize::MAX,
        }
    }

    /// Conservative limits for tapes of unknown origin.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            max_path_len: 1024,
            max_entries: 16,
        }
    }
}
