use std::fmt;
use std::path::{Path, PathBuf};

/// Where a feature matrix is physically stored.
///
/// With an offset, the locator points at the first byte of the float payload
/// inside an append-only matrix store. Without one, the file holds a single
/// record and the payload of its first record is meant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub path: PathBuf,
    pub offset: Option<u64>,
}

impl Locator {
    pub fn new(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset: Some(offset),
        }
    }

    /// A locator for store-per-file mode.
    pub fn whole_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses `<path>:<offset>` or `<path>`.
    ///
    /// The suffix after the last colon is taken as the offset only when it is
    /// a valid `u64`; otherwise the whole token is the path.
    pub fn parse(token: &str) -> Self {
        if let Some((path, offset)) = token.rsplit_once(':') {
            if !path.is_empty() {
                if let Ok(offset) = offset.parse::<u64>() {
                    return Self::new(path, offset);
                }
            }
        }
        Self::whole_file(token)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(off) => write!(f, "{}:{}", self.path.display(), off),
            None => write!(f, "{}", self.path.display()),
        }
    }
}
