//! Column (.sidx, JSON) and frame (.frame_idx, INI) index files.
//!
//! A column index lists the column's type, segment files and per-segment
//! row counts. A frame index names the columns and references each
//! column's index file. Segment and index references are stored as bare
//! file names when co-located with the index, and as absolute paths
//! otherwise (reference saves and compacted columns point across
//! directories).

use std::collections::HashMap;
use std::path::Path;

use xframe_types::error::{Result, XFrameError};
use xframe_types::value::ValueKind;

pub const COLUMN_INDEX_VERSION: u32 = 1;
pub const FRAME_INDEX_VERSION: u32 = 1;

/// Store `path` relative to `base_dir` when it lives directly inside it.
pub fn relativize(path: &str, base_dir: &Path) -> String {
    let p = Path::new(path);
    match p.parent() {
        Some(parent) if parent == base_dir => p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string()),
        _ => path.to_string(),
    }
}

/// Resolve a stored reference against the directory of its index file.
pub fn resolve(stored: &str, base_dir: &Path) -> String {
    let p = Path::new(stored);
    if p.is_absolute() {
        stored.to_string()
    } else {
        base_dir.join(p).to_string_lossy().into_owned()
    }
}

// ---------------------------------------------------------------------------
// Column index (.sidx)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ColumnIndex {
    pub version: u32,
    pub dtype: ValueKind,
    /// Resolved (absolute or index-relative) segment file paths.
    pub segment_files: Vec<String>,
    pub segment_sizes: Vec<u64>,
}

impl ColumnIndex {
    /// Parse a .sidx file's JSON content. `index_path` resolves relative
    /// segment references.
    pub fn parse(content: &str, index_path: &str) -> Result<Self> {
        let base_dir = Path::new(index_path)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();

        let json: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| XFrameError::Parse(format!("invalid JSON in .sidx: {}", e)))?;

        let sarray = json
            .get("sarray")
            .ok_or_else(|| XFrameError::Parse("missing 'sarray' in .sidx".to_string()))?;
        let version = sarray
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| XFrameError::Parse("missing sarray.version".to_string()))?
            as u32;
        let num_segments = sarray
            .get("num_segments")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| XFrameError::Parse("missing sarray.num_segments".to_string()))?
            as usize;
        let dtype_id = sarray
            .get("dtype")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| XFrameError::Parse("missing sarray.dtype".to_string()))?;
        let dtype = ValueKind::try_from(dtype_id as u8)?;

        let mut segment_files = parse_indexed_map(&json, "segment_files")?;
        for f in &mut segment_files {
            *f = resolve(f, &base_dir);
        }
        let segment_sizes: Vec<u64> = parse_indexed_map(&json, "segment_sizes")?
            .iter()
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|_| XFrameError::Parse(format!("invalid segment size: {}", s)))
            })
            .collect::<Result<_>>()?;

        if segment_files.len() != num_segments || segment_sizes.len() != num_segments {
            return Err(XFrameError::Parse(format!(
                "expected {} segments, found {} files / {} sizes",
                num_segments,
                segment_files.len(),
                segment_sizes.len()
            )));
        }

        Ok(ColumnIndex {
            version,
            dtype,
            segment_files,
            segment_sizes,
        })
    }

    /// Build the .sidx JSON content. Segment paths directly inside the
    /// index's directory are stored as bare names.
    pub fn build(
        index_path: &str,
        dtype: ValueKind,
        segment_files: &[String],
        segment_sizes: &[u64],
    ) -> Result<String> {
        use serde_json::{json, Map, Value as Json};

        let base_dir = Path::new(index_path)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();

        let mut files = Map::new();
        for (i, f) in segment_files.iter().enumerate() {
            files.insert(
                format!("{:04}", i),
                Json::String(relativize(f, &base_dir)),
            );
        }
        let mut sizes = Map::new();
        for (i, s) in segment_sizes.iter().enumerate() {
            sizes.insert(format!("{:04}", i), Json::String(s.to_string()));
        }

        let sidx = json!({
            "sarray": {
                "version": COLUMN_INDEX_VERSION,
                "num_segments": segment_files.len(),
                "dtype": dtype as u8,
            },
            "segment_files": files,
            "segment_sizes": sizes,
        });

        serde_json::to_string_pretty(&sidx)
            .map_err(|e| XFrameError::Parse(format!("JSON serialization error: {}", e)))
    }
}

fn parse_indexed_map(json: &serde_json::Value, key: &str) -> Result<Vec<String>> {
    let obj = json
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| XFrameError::Parse(format!("missing '{}' in .sidx", key)))?;

    let mut entries: Vec<(usize, String)> = Vec::with_capacity(obj.len());
    for (k, v) in obj {
        let idx: usize = k
            .parse()
            .map_err(|_| XFrameError::Parse(format!("invalid {} key: {}", key, k)))?;
        let val = v
            .as_str()
            .ok_or_else(|| XFrameError::Parse(format!("invalid {} value for key {}", key, k)))?;
        entries.push((idx, val.to_string()));
    }
    entries.sort_by_key(|(idx, _)| *idx);
    Ok(entries.into_iter().map(|(_, v)| v).collect())
}

// ---------------------------------------------------------------------------
// Frame index (.frame_idx)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FrameIndex {
    pub version: u32,
    pub nrows: u64,
    pub num_segments: usize,
    pub column_names: Vec<String>,
    /// Resolved paths to the per-column .sidx files.
    pub column_files: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl FrameIndex {
    /// Parse a .frame_idx file's INI content.
    pub fn parse(content: &str, index_path: &str) -> Result<Self> {
        let base_dir = Path::new(index_path)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();

        let mut version = 0u32;
        let mut num_columns = 0usize;
        let mut num_segments = 0usize;
        let mut nrows = 0u64;
        let mut column_names: Vec<(usize, String)> = Vec::new();
        let mut column_files: Vec<(usize, String)> = Vec::new();
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
                    "xframe" => match key {
                        "version" => {
                            version = value.parse().map_err(|_| {
                                XFrameError::Parse(format!("invalid version: {}", value))
                            })?
                        }
                        "num_columns" => {
                            num_columns = value.parse().map_err(|_| {
                                XFrameError::Parse(format!("invalid num_columns: {}", value))
                            })?
                        }
                        "num_segments" => {
                            num_segments = value.parse().map_err(|_| {
                                XFrameError::Parse(format!("invalid num_segments: {}", value))
                            })?
                        }
                        "nrows" => {
                            nrows = value.parse().map_err(|_| {
                                XFrameError::Parse(format!("invalid nrows: {}", value))
                            })?
                        }
                        _ => {}
                    },
                    "column_names" => {
                        let idx: usize = key.parse().map_err(|_| {
                            XFrameError::Parse(format!("invalid column index: {}", key))
                        })?;
                        column_names.push((idx, value.to_string()));
                    }
                    "column_files" => {
                        let idx: usize = key.parse().map_err(|_| {
                            XFrameError::Parse(format!("invalid column index: {}", key))
                        })?;
                        column_files.push((idx, resolve(value, &base_dir)));
                    }
                    "metadata" => {
                        metadata.insert(key.to_string(), value.to_string());
                    }
                    _ => {}
                }
            }
        }

        column_names.sort_by_key(|(idx, _)| *idx);
        column_files.sort_by_key(|(idx, _)| *idx);
        let column_names: Vec<String> = column_names.into_iter().map(|(_, v)| v).collect();
        let column_files: Vec<String> = column_files.into_iter().map(|(_, v)| v).collect();

        if column_names.len() != num_columns || column_files.len() != num_columns {
            return Err(XFrameError::Parse(format!(
                "expected {} columns, found {} names / {} files",
                num_columns,
                column_names.len(),
                column_files.len()
            )));
        }

        Ok(FrameIndex {
            version,
            nrows,
            num_segments,
            column_names,
            column_files,
            metadata,
        })
    }

    /// Build the .frame_idx INI content.
    pub fn build(
        index_path: &str,
        nrows: u64,
        num_segments: usize,
        column_names: &[String],
        column_files: &[String],
        metadata: &HashMap<String, String>,
    ) -> String {
        let base_dir = Path::new(index_path)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();

        let mut content = String::new();
        content.push_str("[xframe]\n");
        content.push_str(&format!("version={}\n", FRAME_INDEX_VERSION));
        content.push_str(&format!("num_segments={}\n", num_segments));
        content.push_str(&format!("num_columns={}\n", column_names.len()));
        content.push_str(&format!("nrows={}\n", nrows));

        content.push_str("\n[column_names]\n");
        for (i, name) in column_names.iter().enumerate() {
            content.push_str(&format!("{}={}\n", i, name));
        }

        content.push_str("\n[column_files]\n");
        for (i, file) in column_files.iter().enumerate() {
            content.push_str(&format!("{}={}\n", i, relativize(file, &base_dir)));
        }

        content.push_str("\n[metadata]\n");
        for (key, value) in metadata {
            content.push_str(&format!("{}={}\n", key, value));
        }

        content
    }
}
