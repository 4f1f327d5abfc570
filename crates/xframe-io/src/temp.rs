//! Process-wide temp-file manager.
//!
//! Materialized intermediates, shuffle buckets and sort partitions all live
//! under a single per-process scratch root that is deleted when the process
//! exits. Individual directories handed out by [`alloc_temp_dir`] come with
//! a reference-counted guard; holding the guard keeps the directory alive,
//! and dropping the last clone unlinks it ("delete on close").

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use tempfile::TempDir;
use xframe_types::error::Result;

struct TempRoot {
    dir: TempDir,
    counter: AtomicU64,
}

static TEMP_ROOT: LazyLock<TempRoot> = LazyLock::new(|| {
    let dir = tempfile::Builder::new()
        .prefix("xframe-")
        .tempdir()
        .expect("failed to create xframe temp root");
    log::debug!("temp root at {}", dir.path().display());
    TempRoot {
        dir,
        counter: AtomicU64::new(0),
    }
});

/// Path of the process-wide scratch root.
pub fn temp_root() -> PathBuf {
    TEMP_ROOT.dir.path().to_path_buf()
}

/// Unlinks its directory when the last clone drops.
pub struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            // The root cleans up at process exit anyway.
            log::warn!("failed to remove temp dir {}: {}", self.path.display(), e);
        } else {
            log::trace!("removed temp dir {}", self.path.display());
        }
    }
}

/// Allocate a fresh scratch directory.
///
/// Returns its path and the delete-on-drop guard. `tag` makes the directory
/// name recognizable when debugging leftover scratch space.
pub fn alloc_temp_dir(tag: &str) -> Result<(String, Arc<TempDirGuard>)> {
    let root = &*TEMP_ROOT;
    let n = root.counter.fetch_add(1, Ordering::Relaxed);
    let path = root.dir.path().join(format!("{}_{:06}", tag, n));
    std::fs::create_dir_all(&path)?;
    let guard = Arc::new(TempDirGuard { path: path.clone() });
    Ok((path.to_string_lossy().into_owned(), guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_unique_dirs() {
        let (a, _ga) = alloc_temp_dir("t").unwrap();
        let (b, _gb) = alloc_temp_dir("t").unwrap();
        assert_ne!(a, b);
        assert!(std::path::Path::new(&a).is_dir());
        assert!(std::path::Path::new(&b).is_dir());
    }

    #[test]
    fn test_guard_removes_dir_on_last_drop() {
        let (path, guard) = alloc_temp_dir("drop").unwrap();
        std::fs::write(std::path::Path::new(&path).join("f.bin"), b"x").unwrap();

        let second = guard.clone();
        drop(guard);
        assert!(
            std::path::Path::new(&path).is_dir(),
            "dir must survive while a guard clone is alive"
        );
        drop(second);
        assert!(!std::path::Path::new(&path).exists());
    }

    #[test]
    fn test_dirs_live_under_root() {
        let (path, _g) = alloc_temp_dir("root").unwrap();
        assert!(std::path::Path::new(&path).starts_with(temp_root()));
    }
}
