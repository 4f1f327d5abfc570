//! Directory archives: the outermost on-disk container.
//!
//! An archive is a directory holding a `dir_archive.ini` manifest:
//!
//! ```text
//! [archive]
//! version=1
//! num_prefixes=2
//!
//! [metadata]
//! contents=xframe
//!
//! [prefixes]
//! 0000=dir_archive.ini
//! 0001=m_0f3a99b2c41d5e67
//! ```
//!
//! Writers allocate fresh file-name prefixes via [`DirArchiveWriter::get_next_prefix`];
//! every file belonging to the archive starts with a registered prefix.

use std::collections::HashMap;
use std::path::Path;

use xframe_io::vfs::VirtualFileSystem;
use xframe_types::error::{Result, XFrameError};

pub const ARCHIVE_VERSION: u32 = 1;
const MANIFEST: &str = "dir_archive.ini";

/// A parsed, read-only archive.
pub struct DirArchive {
    pub version: u32,
    pub prefixes: Vec<String>,
    metadata: HashMap<String, String>,
    dir: String,
}

impl DirArchive {
    /// Open an existing archive directory.
    pub fn open_for_read(vfs: &dyn VirtualFileSystem, dir: &str) -> Result<Self> {
        let manifest_path = Path::new(dir).join(MANIFEST);
        let content = vfs.read_to_string(&manifest_path.to_string_lossy())?;
        Self::parse(&content, dir)
    }

    fn parse(content: &str, dir: &str) -> Result<Self> {
        let mut version = 0u32;
        let mut prefixes = Vec::new();
        let mut metadata = HashMap::new();
        let mut section = String::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].to_string();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                match section.as_str() {
                    "archive" => {
                        if key == "version" {
                            version = value.parse().map_err(|_| {
                                XFrameError::Parse(format!(
                                    "invalid version in {}: {}",
                                    MANIFEST, value
                                ))
                            })?;
                        }
                    }
                    "metadata" => {
                        metadata.insert(key.to_string(), value.to_string());
                    }
                    "prefixes" => prefixes.push(value.to_string()),
                    _ => {}
                }
            }
        }

        Ok(DirArchive {
            version,
            prefixes,
            metadata,
            dir: dir.to_string(),
        })
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    /// The first data prefix (anything that is not the manifest itself).
    pub fn data_prefix(&self) -> Result<&str> {
        self.prefixes
            .iter()
            .map(|s| s.as_str())
            .find(|p| *p != MANIFEST)
            .ok_or_else(|| {
                XFrameError::Parse(format!("no data prefix found in {}/{}", self.dir, MANIFEST))
            })
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }
}

/// Builds a new archive directory.
pub struct DirArchiveWriter {
    dir: String,
    prefixes: Vec<String>,
    metadata: HashMap<String, String>,
    next_prefix_id: usize,
}

impl DirArchiveWriter {
    /// Create (or truncate into) an archive directory.
    pub fn open_for_write(vfs: &dyn VirtualFileSystem, dir: &str) -> Result<Self> {
        vfs.mkdir_p(dir)?;
        Ok(DirArchiveWriter {
            dir: dir.to_string(),
            prefixes: vec![MANIFEST.to_string()],
            metadata: HashMap::new(),
            next_prefix_id: 0,
        })
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    /// Allocate a fresh file-name prefix within the archive. Files written
    /// under it belong to this archive.
    pub fn get_next_prefix(&mut self) -> String {
        let prefix = format!("m_{:016x}", fnv_hash(&self.dir, self.next_prefix_id));
        self.next_prefix_id += 1;
        self.prefixes.push(prefix.clone());
        prefix
    }

    /// Absolute path for a file name inside the archive.
    pub fn path_for(&self, file_name: &str) -> String {
        Path::new(&self.dir)
            .join(file_name)
            .to_string_lossy()
            .into_owned()
    }

    /// Write the manifest and finish the archive.
    pub fn close(self, vfs: &dyn VirtualFileSystem) -> Result<()> {
        let mut content = String::new();
        content.push_str("[archive]\n");
        content.push_str(&format!("version={}\n", ARCHIVE_VERSION));
        content.push_str(&format!("num_prefixes={}\n", self.prefixes.len()));
        content.push_str("\n[metadata]\n");
        for (key, value) in &self.metadata {
            content.push_str(&format!("{}={}\n", key, value));
        }
        content.push_str("\n[prefixes]\n");
        for (i, p) in self.prefixes.iter().enumerate() {
            content.push_str(&format!("{:04}={}\n", i, p));
        }

        let manifest_path = Path::new(&self.dir).join(MANIFEST);
        vfs.write_string(&manifest_path.to_string_lossy(), &content)
    }
}

/// FNV-1a over the directory path and a counter; only used for unique,
/// readable file naming.
fn fnv_hash(path: &str, salt: usize) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in path.as_bytes().iter().chain(salt.to_le_bytes().iter()) {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use xframe_io::local_fs::LocalFileSystem;

    #[test]
    fn test_archive_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("frame.xf");
        let dir_str = dir.to_str().unwrap();
        let fs = LocalFileSystem;

        let prefix;
        {
            let mut w = DirArchiveWriter::open_for_write(&fs, dir_str).unwrap();
            w.set_metadata("contents", "xframe");
            prefix = w.get_next_prefix();
            w.close(&fs).unwrap();
        }

        let archive = DirArchive::open_for_read(&fs, dir_str).unwrap();
        assert_eq!(archive.version, ARCHIVE_VERSION);
        assert_eq!(archive.get_metadata("contents"), Some("xframe"));
        assert_eq!(archive.data_prefix().unwrap(), prefix);
    }

    #[test]
    fn test_prefixes_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        let mut w =
            DirArchiveWriter::open_for_write(&fs, tmp.path().to_str().unwrap()).unwrap();
        let a = w.get_next_prefix();
        let b = w.get_next_prefix();
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_manifest_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        assert!(DirArchive::open_for_read(&fs, tmp.path().to_str().unwrap()).is_err());
    }
}
