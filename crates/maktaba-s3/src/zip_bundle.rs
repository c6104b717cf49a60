//! In-memory ZIP assembly for the download endpoints.

use std::io::{Cursor, Write};

use maktaba::{Error, Result};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Build a deflate-compressed ZIP from `(entry_name, bytes)` pairs.
pub fn build_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, content) in entries {
        writer
            .start_file(name, options)
            .map_err(|e| Error::other(format!("ZIP entry {name} failed: {e}")))?;
        writer
            .write_all(content)
            .map_err(|e| Error::other(format!("ZIP write for {name} failed: {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| Error::other(format!("ZIP finalize failed: {e}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_round_trip() {
        let entries = vec![
            ("42/001.htm".to_string(), b"<html>one</html>".to_vec()),
            ("42/002.htm".to_string(), b"<html>two</html>".to_vec()),
        ];
        let bytes = build_zip(&entries).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut file = archive.by_name("42/001.htm").unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "<html>one</html>");
    }

    #[test]
    fn test_empty_archive_is_valid() {
        let bytes = build_zip(&[]).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
