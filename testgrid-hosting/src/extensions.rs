//! Adapter extension paths and the caller-controlled extension cache

use std::sync::Mutex;

/// De-duplicate extension paths case-insensitively, keeping first-seen order
pub fn dedup_ordered<I>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen: Vec<String> = Vec::new();
    let mut result = Vec::new();

    for path in paths {
        let key = path.to_lowercase();
        if !seen.contains(&key) {
            seen.push(key);
            result.push(path);
        }
    }

    result
}

/// Shareable handle over the set of known adapter extension paths
///
/// Replaces any notion of a process-wide plugin cache: the caller creates
/// one, loads it, and hands it to the managers that need it. `reset` and
/// `load` are the explicit lifecycle.
#[derive(Debug, Default)]
pub struct ExtensionCache {
    paths: Mutex<Vec<String>>,
}

impl ExtensionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths(paths: Vec<String>) -> Self {
        Self {
            paths: Mutex::new(dedup_ordered(paths)),
        }
    }

    /// Merge additional paths into the cache
    pub fn load(&self, paths: Vec<String>) {
        let mut guard = self.paths.lock().expect("extension cache poisoned");
        let merged = dedup_ordered(guard.iter().cloned().chain(paths));
        *guard = merged;
    }

    /// Drop every cached path
    pub fn reset(&self) {
        self.paths.lock().expect("extension cache poisoned").clear();
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.paths.lock().expect("extension cache poisoned").clone()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().expect("extension cache poisoned").is_empty()
    }
}
