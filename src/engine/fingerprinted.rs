use std::collections::HashSet;

use crate::index::{IndexError, SqliteIndex};

/// Content hashes of every fully fingerprinted file.
///
/// Loaded from the index at startup and refreshed after each import. Worker
/// threads get a cloned snapshot; only the single writer refreshes it.
#[derive(Debug, Clone, Default)]
pub struct FingerprintedSet {
    hashes: HashSet<String>,
}

impl FingerprintedSet {
    pub fn load(index: &SqliteIndex) -> Result<Self, IndexError> {
        Ok(Self {
            hashes: index.fingerprinted_content_hashes()?,
        })
    }

    pub fn contains(&self, content_hash: &str) -> bool {
        self.hashes.contains(&content_hash.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
