//! Physical package access, reading and writing the ZIP archive.
//!
//! This layer knows about ZIP members and nothing about relationships or
//! content types; the logical model in [`crate::package`] sits on top.

use crate::error::{PackError, Result};
use crate::packuri::{CONTENT_TYPES_URI, PackURI};
use chrono::{Datelike, Local, Timelike};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Read-side access to a package archive.
pub struct ZipPkgReader<R: Read + Seek> {
    archive: ZipArchive<R>,
}

impl ZipPkgReader<File> {
    /// Open the package file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PackError::PackageNotFound(path.display().to_string()));
        }
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> ZipPkgReader<R> {
    /// Open a package from any seekable reader.
    pub fn new(reader: R) -> Result<Self> {
        Ok(Self {
            archive: ZipArchive::new(reader)?,
        })
    }

    /// Read the content-types manifest, required in every package.
    pub fn content_types_xml(&mut self) -> Result<Vec<u8>> {
        self.read_member(&CONTENT_TYPES_URI[1..])
            .map_err(|err| match err {
                PackError::Zip(ZipError::FileNotFound) => {
                    PackError::Format("package has no content-types manifest".to_string())
                }
                other => other,
            })
    }

    /// Read the `.rels` member at `rels_uri`, or `None` when the source has
    /// no relationships member.
    pub fn rels_xml_for(&mut self, rels_uri: &PackURI) -> Result<Option<Vec<u8>>> {
        match self.read_member(rels_uri.membername()) {
            Ok(blob) => Ok(Some(blob)),
            Err(PackError::Zip(ZipError::FileNotFound)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Read the serialized bytes of the part named `partname`.
    ///
    /// A part stored in pieces is reassembled by concatenating every member
    /// under the part's name in archive order. A target with no members at
    /// all reads as empty, so an archive whose writer omitted a part (a
    /// dangling relationship target) still loads.
    ///
    /// # Arguments
    /// * `partname` - The part name whose members to read
    ///
    /// # Returns
    /// The concatenated member bytes, empty when no member matches
    pub fn blob_for(&mut self, partname: &PackURI) -> Result<Vec<u8>> {
        let member = partname.membername();
        let piece_prefix = format!("{member}/");

        let mut blob = Vec::new();
        for index in 0..self.archive.len() {
            let mut file = self.archive.by_index(index)?;
            if file.name() == member || file.name().starts_with(&piece_prefix) {
                file.read_to_end(&mut blob)?;
            }
        }
        Ok(blob)
    }

    /// Check whether the archive holds a member with this exact name.
    pub fn contains(&self, membername: &str) -> bool {
        self.archive.index_for_name(membername).is_some()
    }

    /// Get every member name in the archive.
    pub fn member_names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    fn read_member(&mut self, membername: &str) -> Result<Vec<u8>> {
        let mut file = self.archive.by_name(membername)?;
        let mut blob = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut blob)?;
        Ok(blob)
    }
}

/// Write-side access to a package archive.
///
/// Every member gets the same timestamp, captured once at construction, so
/// the archive does not leak per-member write ordering in its metadata.
pub struct ZipPkgWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    options: SimpleFileOptions,
}

impl<W: Write + Seek> ZipPkgWriter<W> {
    pub fn new(writer: W) -> Self {
        let now = Local::now();
        let stamp = zip::DateTime::from_date_and_time(
            now.year() as u16,
            now.month() as u8,
            now.day() as u8,
            now.hour() as u8,
            now.minute() as u8,
            now.second() as u8,
        )
        .unwrap_or_default();

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o600)
            .last_modified_time(stamp);

        Self {
            zip: ZipWriter::new(writer),
            options,
        }
    }

    /// Write one member holding the serialized bytes of `partname`.
    pub fn write(&mut self, partname: &PackURI, blob: &[u8]) -> Result<()> {
        self.zip.start_file(partname.membername(), self.options)?;
        self.zip.write_all(blob)?;
        Ok(())
    }

    /// Finish the archive and hand back the underlying writer.
    pub fn finish(self) -> Result<W> {
        Ok(self.zip.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn name(s: &str) -> PackURI {
        PackURI::new(s).unwrap()
    }

    fn archive_with(parts: &[(&str, &[u8])]) -> ZipPkgReader<Cursor<Vec<u8>>> {
        let mut writer = ZipPkgWriter::new(Cursor::new(Vec::new()));
        for (partname, blob) in parts {
            writer.write(&name(partname), blob).unwrap();
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        ZipPkgReader::new(cursor).unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let mut reader = archive_with(&[
            ("/word/document.xml", b"<doc/>"),
            ("/media/image1.png", &[1, 2, 3]),
        ]);

        assert!(reader.contains("word/document.xml"));
        assert!(!reader.contains("word/other.xml"));
        assert_eq!(reader.blob_for(&name("/word/document.xml")).unwrap(), b"<doc/>");
        assert_eq!(reader.blob_for(&name("/media/image1.png")).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_part_reads_empty() {
        let mut reader = archive_with(&[("/a.xml", b"<a/>")]);
        assert_eq!(reader.blob_for(&name("/missing.xml")).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_pieced_part_reassembled_in_archive_order() {
        let mut reader = archive_with(&[
            ("/big.bin/first.piece", b"hello "),
            ("/big.bin/last.piece", b"world"),
        ]);
        assert_eq!(reader.blob_for(&name("/big.bin")).unwrap(), b"hello world");
    }

    #[test]
    fn test_piece_prefix_does_not_match_siblings() {
        let mut reader = archive_with(&[("/a.xml", b"<a/>"), ("/a.xml2", b"<b/>")]);
        assert_eq!(reader.blob_for(&name("/a.xml")).unwrap(), b"<a/>");
    }

    #[test]
    fn test_missing_rels_member_is_none() {
        let mut reader = archive_with(&[("/a.xml", b"<a/>")]);
        let rels_uri = name("/a.xml").rels_uri().unwrap();
        assert!(reader.rels_xml_for(&rels_uri).unwrap().is_none());
    }

    #[test]
    fn test_missing_manifest_is_a_format_error() {
        let mut reader = archive_with(&[("/a.xml", b"<a/>")]);
        assert!(matches!(
            reader.content_types_xml().unwrap_err(),
            PackError::Format(_)
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let err = ZipPkgReader::open("/no/such/package.docx").err().unwrap();
        assert!(matches!(err, PackError::PackageNotFound(_)));
    }
}
