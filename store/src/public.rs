//! The public database: a read-only copy external tools may query without
//! locking the scheduler

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Result;

/// Tracks the public DB file and when it was last refreshed from the private one.
pub struct PublicStore {
    path: PathBuf,
    last_refresh: Option<Instant>,
    lock_since: Option<Instant>,
}

impl PublicStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_refresh: None,
            lock_since: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the private database file over the public one. SQLite's own file-copy
    /// semantics are safe here because the private connection commits one
    /// transaction per scheduling iteration before this is called, so
    /// there is never a half-written row to copy.
    pub fn refresh_from(&mut self, private_path: &Path) -> Result<()> {
        debug!(?private_path, public = ?self.path, "PublicStore::refresh_from");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::copy(private_path, &tmp)?;
        std::fs::rename(&tmp, &self.path)?;
        self.last_refresh = Some(Instant::now());
        self.lock_since = None;
        Ok(())
    }

    /// Whether it is time to refresh, given `interval`.
    pub fn due(&self, interval: Duration) -> bool {
        match self.last_refresh {
            None => true,
            Some(t) => t.elapsed() >= interval,
        }
    }

    /// Record that the public DB file appeared locked to a writer attempt.
    /// Call `refresh_from` unconditionally once `locked_for` exceeds `threshold`
    /// to force a clean rebuild.
    pub fn note_lock_attempt(&mut self) {
        if self.lock_since.is_none() {
            self.lock_since = Some(Instant::now());
        }
    }

    pub fn locked_too_long(&self, threshold: Duration) -> bool {
        match self.lock_since {
            Some(since) => {
                let locked = since.elapsed() >= threshold;
                if locked {
                    warn!(?threshold, "public database locked past threshold, will rebuild");
                }
                locked
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::private::PrivateStore;
    use tempfile::tempdir;

    #[test]
    fn test_refresh_copies_file() {
        let dir = tempdir().unwrap();
        let private_path = dir.path().join("private.db");
        {
            let store = PrivateStore::open(&private_path).unwrap();
            store.save_workflow_params(&Default::default()).unwrap();
        }

        let mut public = PublicStore::new(dir.path().join("public.db"));
        assert!(public.due(Duration::from_secs(10)));
        public.refresh_from(&private_path).unwrap();
        assert!(public.path().exists());
        assert!(!public.due(Duration::from_secs(10)));
    }

    #[test]
    fn test_lock_threshold() {
        let mut public = PublicStore::new("/tmp/doesnotmatter.db");
        assert!(!public.locked_too_long(Duration::from_millis(1)));
        public.note_lock_attempt();
        std::thread::sleep(Duration::from_millis(5));
        assert!(public.locked_too_long(Duration::from_millis(1)));
    }
}
