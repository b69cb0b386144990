//! Segment and bloom-filter file naming: `<startOffset>_<name>.index` and
//! `<startOffset>_<name>.bloom`, sortable by the decimal `startOffset`
//! prefix (§3, §6). Mirrors the reference crate's `IndexFileName`/
//! `VlogFileName` round-trip convention (`robt::files`).

use std::{convert::TryFrom, ffi, path};

use crate::error::{Result, StoreError};

pub const INDEX_EXT: &str = "index";
pub const BLOOM_EXT: &str = "bloom";
pub const CLEAN_SHUTDOWN_MARKER: &str = "cleanshutdown";

#[derive(Clone, Debug)]
pub struct SegmentFileName {
    pub start_offset: u64,
    pub name: String,
}

impl SegmentFileName {
    pub fn index_path(&self, dir: &ffi::OsStr) -> path::PathBuf {
        path::Path::new(dir).join(format!("{}_{}.{}", self.start_offset, self.name, INDEX_EXT))
    }

    pub fn bloom_path(&self, dir: &ffi::OsStr) -> path::PathBuf {
        path::Path::new(dir).join(format!("{}_{}.{}", self.start_offset, self.name, BLOOM_EXT))
    }
}

impl TryFrom<&path::Path> for SegmentFileName {
    type Error = StoreError;

    fn try_from(path: &path::Path) -> Result<SegmentFileName> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StoreError::InvalidArgument(format!("{:?} not a segment file", path)))?;
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        if ext != INDEX_EXT {
            return Err(StoreError::InvalidArgument(format!("{:?} not a segment file", path)));
        }

        let (start_offset, name) = stem.split_once('_').ok_or_else(|| {
            StoreError::InvalidArgument(format!("{:?} missing startOffset_ prefix", path))
        })?;
        let start_offset: u64 = start_offset
            .parse()
            .map_err(|_| StoreError::InvalidArgument(format!("{:?} has non-numeric prefix", path)))?;

        Ok(SegmentFileName {
            start_offset,
            name: name.to_string(),
        })
    }
}

pub fn clean_shutdown_marker_path(dir: &ffi::OsStr) -> path::PathBuf {
    path::Path::new(dir).join(CLEAN_SHUTDOWN_MARKER)
}

/// List segment index files under `dir`, in ascending `startOffset` order
/// (§4.3: "load segment files in ascending startOffset order").
pub fn list_segment_files(dir: &ffi::OsStr) -> Result<Vec<SegmentFileName>> {
    let mut found = Vec::new();
    let entries = crate::err_at!(IOError, std::fs::read_dir(dir))?;
    for entry in entries {
        let entry = crate::err_at!(IOError, entry)?;
        if let Ok(sfn) = SegmentFileName::try_from(entry.path().as_path()) {
            found.push(sfn);
        }
    }
    found.sort_by_key(|sfn| sfn.start_offset);
    Ok(found)
}

#[cfg(test)]
#[path = "files_test.rs"]
mod files_test;
