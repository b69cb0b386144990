use std::{convert::TryFrom, ffi::OsString, path::Path};

use super::*;

#[test]
fn parses_start_offset_and_name() {
    let sfn = SegmentFileName::try_from(Path::new("/data/1024_blobstore.index")).unwrap();
    assert_eq!(sfn.start_offset, 1024);
    assert_eq!(sfn.name, "blobstore");
}

#[test]
fn rejects_non_index_extension() {
    assert!(SegmentFileName::try_from(Path::new("/data/1024_blobstore.bloom")).is_err());
}

#[test]
fn rejects_missing_prefix() {
    assert!(SegmentFileName::try_from(Path::new("/data/blobstore.index")).is_err());
}

#[test]
fn round_trips_through_index_path() {
    let sfn = SegmentFileName {
        start_offset: 42,
        name: "store".to_string(),
    };
    let dir: OsString = "/data".into();
    let path = sfn.index_path(&dir);
    let parsed = SegmentFileName::try_from(path.as_path()).unwrap();
    assert_eq!(parsed.start_offset, 42);
    assert_eq!(parsed.name, "store");
}

#[test]
fn lists_segment_files_in_ascending_order() {
    let dir = tempfile::tempdir().unwrap();
    for (offset, name) in [(100u64, "s"), (0, "s"), (50, "s")] {
        let sfn = SegmentFileName {
            start_offset: offset,
            name: name.to_string(),
        };
        std::fs::write(sfn.index_path(dir.path().as_os_str()), b"").unwrap();
    }

    let found = list_segment_files(dir.path().as_os_str()).unwrap();
    let offsets: Vec<u64> = found.iter().map(|s| s.start_offset).collect();
    assert_eq!(offsets, vec![0, 50, 100]);
}
