//! Path reconstruction and target matching.
//!
//! Every treename record spells out the full path of one file or directory, one tree entry per
//! component.  The decoder lowercases the components, joins them with `/` and compares the
//! result against the requested targets.
//!
//! Targets are path prefixes that match at component boundaries: `a/b` selects `a/b` and
//! everything below it, but not `a/bc`.  The empty target selects everything.  Because a save is
//! written depth-first, a target that matched and then stops matching will never match again, so
//! once every target has been seen and left the decoder can stop reading.

use std::path::{Component, Path, PathBuf};

use crate::{
    error::{DecodeError, Result},
    limits::Limits,
    record::DirectoryRecord,
};

/// Builds the lowercased, `/`-separated path named by a treename record.
pub fn candidate_path(record: &DirectoryRecord, limits: &Limits) -> Result<String> {
    let mut path = String::new();
    for (i, entry) in record.entries().enumerate() {
        if i > 0 {
            path.push('/');
        }
        path.extend(entry.name.chars().map(|c| c.to_ascii_lowercase()));

        if path.len() > limits.max_path_len {
            return Err(DecodeError::PathTooLong {
                len: path.len(),
                limit: limits.max_path_len,
            });
        }
    }
    Ok(path)
}

/// Turns an accepted path into a relative path below the extraction root.
///
/// Empty components are dropped; `.` and `..` components are refused.
pub fn output_path(path: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for part in path.split('/').filter(|part| !part.is_empty()) {
        match Path::new(part).components().next() {
            Some(Component::Normal(_)) => out.push(part),
            _ => return Err(DecodeError::UnsafePath(path.to_string())),
        }
    }

    if out.as_os_str().is_empty() {
        return Err(DecodeError::UnsafePath(path.to_string()));
    }
    Ok(out)
}

/// Where a target is in its walk through the tape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchState {
    /// Nothing has matched yet.
    Pending,
    /// The most recent path matched.
    Active,
    /// Matched before, but the tape has moved past it.
    Closed,
}

/// One requested path prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetPattern {
    pattern: String,
    state: MatchState,
}

impl TargetPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            state: MatchState::Pending,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    /// Prefix match at a component boundary.
    pub fn matches(&self, candidate: &str) -> bool {
        let len = self.pattern.len();
        candidate.as_bytes().starts_with(self.pattern.as_bytes())
            && (len == 0 || matches!(candidate.as_bytes().get(len), None | Some(b'/')))
    }

    /// Where a path selected by this target is written.
    ///
    /// A target with a directory part extracts relative to its last component, so `a/b`
    /// writes `a/b/c` as `b/c`.
    pub fn rebase(&self, candidate: &str) -> String {
        match self.pattern.rfind('/') {
            Some(slash) => {
                let mut out = self.pattern[slash + 1..].to_string();
                out.push_str(&candidate[self.pattern.len()..]);
                out
            }
            None => candidate.to_string(),
        }
    }
}

/// Result of checking one path against all targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Selected by a target; the string is the path to extract to.
    Accepted(String),
    /// Not selected, but some target may still match later.
    Rejected,
    /// Every target is closed: nothing further on the tape can match.
    Exhausted,
}

/// The set of requested targets and their progress.
#[derive(Clone, Debug)]
pub struct PatternSet {
    patterns: Vec<TargetPattern>,
}

impl PatternSet {
    /// Creates the set.  No patterns at all means "everything".
    pub fn new<S: Into<String>>(patterns: impl IntoIterator<Item = S>) -> Self {
        let mut patterns: Vec<_> = patterns.into_iter().map(TargetPattern::new).collect();
        if patterns.is_empty() {
            patterns.push(TargetPattern::new(""));
        }
        Self { patterns }
    }

    pub fn patterns(&self) -> &[TargetPattern] {
        &self.patterns
    }

    /// Checks `candidate` against every target, updating their states.
    ///
    /// The first (lowest-index) matching target decides the output path.
    pub fn resolve(&mut self, candidate: &str) -> Resolution {
        let mut controlling = None;

        for (i, target) in self.patterns.iter_mut().enumerate() {
            if target.matches(candidate) {
                target.state = MatchState::Active;
                controlling.get_or_insert(i);
            } else if target.state == MatchState::Active {
                target.state = MatchState::Closed;
            }
        }

        if self.is_exhausted() {
            return Resolution::Exhausted;
        }

        match controlling {
            Some(i) => Resolution::Accepted(self.patterns[i].rebase(candidate)),
            None => Resolution::Rejected,
        }
    }

    /// True once no target is pending or active.
    pub fn is_exhausted(&self) -> bool {
        self.patterns
            .iter()
            .all(|target| target.state == MatchState::Closed)
    }

    /// Targets that never matched anything.
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.patterns
            .iter()
            .filter(|target| target.state == MatchState::Pending)
            .map(TargetPattern::as_str)
    }
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::{
        record::Record,
        session::ParseState,
        testutil::{treename_record, TestEntry},
    };

    #[test]
    fn test_prefix_matching() {
        let ab = TargetPattern::new("a/b");
        assert!(ab.matches("a/b"));
        assert!(ab.matches("a/b/c"));
        assert!(!ab.matches("a/bc"));
        assert!(!ab.matches("a"));
        assert!(!ab.matches("x/a/b"));

        let all = TargetPattern::new("");
        for candidate in ["", "a", "a/b", "zzz/yyy"] {
            assert!(all.matches(candidate));
        }
    }

    #[test]
    fn test_rebase() {
        assert_eq!(TargetPattern::new("a/b").rebase("a/b/c"), "b/c");
        assert_eq!(TargetPattern::new("a/b").rebase("a/b"), "b");
        assert_eq!(TargetPattern::new("x/y/z").rebase("x/y/z/w/v"), "z/w/v");
        assert_eq!(TargetPattern::new("a").rebase("a/b"), "a/b");
        assert_eq!(TargetPattern::new("").rebase("a/b"), "a/b");
    }

    #[test]
    fn test_candidate_path() {
        let block = treename_record(&[
            TestEntry::dir("SRC"),
            TestEntry::dir("Lib"),
            TestEntry::file("MAIN.F77"),
        ]);
        let Record::Directory(dir) =
            Record::classify(&block, ParseState::Entry, &Limits::default()).unwrap()
        else {
            panic!("not a treename record");
        };
        assert_eq!(
            candidate_path(&dir, &Limits::default()).unwrap(),
            "src/lib/main.f77"
        );

        let limits = Limits {
            max_path_len: 10,
            ..Default::default()
        };
        assert!(matches!(
            candidate_path(&dir, &limits),
            Err(DecodeError::PathTooLong { limit: 10, .. })
        ));
    }

    #[test]
    fn test_output_path() {
        assert_eq!(output_path("a/b").unwrap(), PathBuf::from("a/b"));
        assert_eq!(output_path("/a//b/").unwrap(), PathBuf::from("a/b"));
        assert!(output_path("a/../b").is_err());
        assert!(output_path("..").is_err());
        assert!(output_path("./a").is_err());
        assert!(output_path("").is_err());
        assert!(output_path("//").is_err());
    }

    #[test]
    fn test_resolve_depth_first() {
        let mut set = PatternSet::new(["docs", "src/lib"]);

        assert_eq!(set.resolve("bin"), Resolution::Rejected);
        assert_eq!(set.resolve("docs"), Resolution::Accepted("docs".into()));
        assert_eq!(
            set.resolve("docs/readme"),
            Resolution::Accepted("docs/readme".into())
        );
        assert_eq!(set.resolve("src"), Resolution::Rejected);
        assert_eq!(set.patterns()[0].state(), MatchState::Closed);
        assert_eq!(set.patterns()[1].state(), MatchState::Pending);

        assert_eq!(
            set.resolve("src/lib/util"),
            Resolution::Accepted("lib/util".into())
        );
        assert_eq!(set.patterns()[1].state(), MatchState::Active);
        assert!(set.missing().next().is_none());

        // leaving the last active subtree ends the walk
        assert_eq!(set.resolve("src/main"), Resolution::Exhausted);
        assert!(set.is_exhausted());
    }

    #[test]
    fn test_first_match_controls() {
        let mut set = PatternSet::new(["a", "a/b"]);
        assert_eq!(set.resolve("a/b/c"), Resolution::Accepted("a/b/c".into()));
        assert_eq!(set.patterns()[1].state(), MatchState::Active);
    }

    #[test]
    fn test_missing() {
        let mut set = PatternSet::new(["here", "nowhere"]);
        set.resolve("here");
        set.resolve("here/file");
        let missing: Vec<_> = set.missing().collect();
        assert_eq!(missing, ["nowhere"]);
    }

    #[test]
    fn test_match_everything() {
        let mut set = PatternSet::new(Vec::<String>::new());
        assert_eq!(set.patterns().len(), 1);
        assert_eq!(set.resolve("x"), Resolution::Accepted("x".into()));
        assert_eq!(set.resolve("y/z"), Resolution::Accepted("y/z".into()));
        assert!(!set.is_exhausted());
        assert!(set.missing().next().is_none());
    }
}
