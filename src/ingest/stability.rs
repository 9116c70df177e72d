//! File stability detection
//!
//! A drop-zone file is only safe to read once its writer has finished. We
//! cannot observe the writer directly, so a file is considered stable when
//! two `(size, mtime)` samples taken one quiescence window apart agree.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Default quiescence window
pub const DEFAULT_STABILITY_WINDOW: Duration = Duration::from_secs(8);

/// One observation of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSample {
    /// Size in bytes
    pub size: u64,
    /// Last modification time, when the platform reports one
    pub modified: Option<SystemTime>,
}

impl FileSample {
    /// Sample a file; `None` if it vanished or cannot be stat'ed
    pub fn take(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Decides whether drop-zone files are quiescent
#[derive(Debug, Clone, Copy)]
pub struct StabilityDetector {
    window: Duration,
}

impl Default for StabilityDetector {
    fn default() -> Self {
        Self::new(DEFAULT_STABILITY_WINDOW)
    }
}

impl StabilityDetector {
    /// Create a detector with the given quiescence window
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// The quiescence window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check if a single file is stable.
    ///
    /// Blocks the calling thread for one window. A file that disappears or
    /// becomes unreadable is reported as not stable rather than as an error.
    pub fn is_stable(&self, path: &Path) -> bool {
        let Some(first) = FileSample::take(path) else {
            tracing::debug!(path = %path.display(), "File vanished before first sample");
            return false;
        };

        std::thread::sleep(self.window);

        let stable = FileSample::take(path) == Some(first);
        if !stable {
            tracing::debug!(path = %path.display(), "File changed during stability window");
        }
        stable
    }

    /// Split a set of files into `(stable, unstable)`, waiting one window for
    /// the whole set instead of one window per file.
    pub fn partition_stable(&self, paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
        if paths.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let first: Vec<Option<FileSample>> = paths.iter().map(|p| FileSample::take(p)).collect();

        std::thread::sleep(self.window);

        let mut stable = Vec::new();
        let mut unstable = Vec::new();
        for (path, before) in paths.iter().zip(first) {
            let after = FileSample::take(path);
            match (before, after) {
                (Some(a), Some(b)) if a == b => stable.push(path.clone()),
                _ => unstable.push(path.clone()),
            }
        }

        (stable, unstable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn detector() -> StabilityDetector {
        StabilityDetector::new(Duration::from_millis(300))
    }

    #[test]
    fn test_untouched_file_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "id\n1\n").unwrap();

        assert!(detector().is_stable(&path));
    }

    #[test]
    fn test_missing_file_is_not_stable() {
        let dir = TempDir::new().unwrap();
        assert!(!detector().is_stable(&dir.path().join("missing.csv")));
    }

    #[test]
    fn test_directory_is_not_stable() {
        let dir = TempDir::new().unwrap();
        assert!(!detector().is_stable(dir.path()));
    }

    #[test]
    fn test_growing_file_is_not_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.csv");
        std::fs::write(&path, "id\n1\n").unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .unwrap();
            file.write_all(b"2\n").unwrap();
        });

        assert!(!detector().is_stable(&path));
        writer.join().unwrap();
    }

    #[test]
    fn test_partition_stable() {
        let dir = TempDir::new().unwrap();
        let quiet = dir.path().join("quiet.csv");
        let busy = dir.path().join("busy.csv");
        let gone = dir.path().join("gone.csv");
        std::fs::write(&quiet, "id\n1\n").unwrap();
        std::fs::write(&busy, "id\n1\n").unwrap();

        let busy_path = busy.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&busy_path)
                .unwrap();
            file.write_all(b"2\n3\n").unwrap();
        });

        let (stable, unstable) =
            detector().partition_stable(&[quiet.clone(), busy.clone(), gone.clone()]);
        writer.join().unwrap();

        assert_eq!(stable, vec![quiet]);
        assert_eq!(unstable, vec![busy, gone]);
    }

    #[test]
    fn test_default_window() {
        assert_eq!(
            StabilityDetector::default().window(),
            Duration::from_secs(8)
        );
    }
}
