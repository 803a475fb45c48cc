//! Zip bundling for image downloads.
//!
//! Archives are built entirely in memory and handed back as a byte buffer
//! for the transport to ship. Entries are stored uncompressed; image
//! payloads do not deflate usefully.

use std::io::{Cursor, Write};

use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::ShareError;

/// Bundle `(owner, filename, bytes)` entries into a zip archive, one entry
/// per image at path `owner/filename`.
pub fn bundle_images<'a, I>(entries: I) -> Result<Vec<u8>, ShareError>
where
    I: IntoIterator<Item = (&'a str, &'a str, &'a [u8])>,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for (owner, filename, bytes) in entries {
        writer
            .start_file(format!("{owner}/{filename}"), options)
            .map_err(|e| ShareError::WriteFailed {
                reason: e.to_string(),
            })?;
        writer.write_all(bytes).map_err(|e| ShareError::WriteFailed {
            reason: e.to_string(),
        })?;
    }

    let cursor = writer.finish().map_err(|e| ShareError::WriteFailed {
        reason: e.to_string(),
    })?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_entry(archive_bytes: &[u8], path: &str) -> Vec<u8> {
        let mut archive = ZipArchive::new(Cursor::new(archive_bytes)).unwrap();
        let mut entry = archive.by_name(path).unwrap();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn single_entry_roundtrip() {
        let bytes = bundle_images([("alice", "cat.png", b"\x89PNG fake".as_slice())]).unwrap();
        assert_eq!(read_entry(&bytes, "alice/cat.png"), b"\x89PNG fake");
    }

    #[test]
    fn entry_count_matches_input() {
        let bytes = bundle_images([
            ("alice", "cat.png", b"one".as_slice()),
            ("bob", "dog.jpg", b"two".as_slice()),
        ])
        .unwrap();
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn paths_nest_under_owner() {
        let bytes = bundle_images([("bob", "dog.jpg", b"woof".as_slice())]).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["bob/dog.jpg"]);
    }

    #[test]
    fn no_entries_is_a_valid_empty_archive() {
        let bytes = bundle_images(std::iter::empty::<(&str, &str, &[u8])>()).unwrap();
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
