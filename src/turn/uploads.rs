//! Files attached to the next turn
//!
//! Attachments arrive as raw bytes plus a MIME type. Text-like files become a
//! fenced text part, PDFs and images are sent as blobs, everything else is
//! rejected. The queue is only cleared once a turn completes.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::llm::Part;
use crate::sandbox::AvailableFiles;

const TEXT_EXTENSIONS: &[&str] = &[".py", ".js", ".md", ".txt", ".json"];

/// Non-`text/*` types that are still plain text on the wire
const TEXT_APPLICATION_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
    "application/x-sh",
    "application/sql",
];

fn is_text_mime(mime_type: &str) -> bool {
    mime_type.starts_with("text/")
        || TEXT_APPLICATION_TYPES.contains(&mime_type)
        || mime_type.ends_with("+json")
        || mime_type.ends_with("+xml")
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Unsupported file type for direct AI processing: {name} ({mime_type})")]
    Unsupported { name: String, mime_type: String },
    #[error("Could not decode text file: {0}")]
    NotUtf8(String),
}

/// One attachment waiting to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFile {
    pub name: String,
    pub mime_type: String,
    /// Request parts produced for this file
    pub parts: Vec<Part>,
    /// Where the bytes were staged for executed code, if they were
    pub staged_path: Option<PathBuf>,
    pub size: usize,
}

impl PendingFile {
    /// Convert raw bytes into a pending attachment.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: &[u8],
    ) -> Result<Self, UploadError> {
        let name = name.into();
        let mime_type = mime_type.into();
        let parts = parts_for_file(&name, &mime_type, bytes)?;
        Ok(Self {
            name,
            mime_type,
            parts,
            staged_path: None,
            size: bytes.len(),
        })
    }

    pub fn with_staged_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.staged_path = Some(path.into());
        self
    }
}

/// Request parts for one attached file.
pub fn parts_for_file(name: &str, mime_type: &str, bytes: &[u8]) -> Result<Vec<Part>, UploadError> {
    if mime_type == "application/pdf" || mime_type.starts_with("image/") {
        return Ok(vec![Part::blob(mime_type, bytes.to_vec())]);
    }

    let lower = name.to_ascii_lowercase();
    if is_text_mime(mime_type) || TEXT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        let text = std::str::from_utf8(bytes).map_err(|_| UploadError::NotUtf8(name.to_string()))?;
        return Ok(vec![Part::text(format!(
            "\n\n[Attached File: {name}]\n```\n{text}\n```\n"
        ))]);
    }

    Err(UploadError::Unsupported {
        name: name.to_string(),
        mime_type: mime_type.to_string(),
    })
}

/// MIME type from a file extension, `application/octet-stream` when unknown.
pub fn guess_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_owned()
}

/// Attachments for the next turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadQueue {
    files: Vec<PendingFile>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a file, replacing an earlier one with the same name.
    pub fn push(&mut self, file: PendingFile) {
        if let Some(existing) = self.files.iter_mut().find(|f| f.name == file.name) {
            warn!(name = %file.name, "Replacing queued attachment with the same name");
            *existing = file;
        } else {
            debug!(name = %file.name, size = file.size, "Queued attachment");
            self.files.push(file);
        }
    }

    pub fn files(&self) -> &[PendingFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// All request parts, in queue order.
    pub fn parts(&self) -> Vec<Part> {
        self.files.iter().flat_map(|f| f.parts.iter().cloned()).collect()
    }

    /// Staged files executed code may open, keyed by file name.
    pub fn available_files(&self) -> AvailableFiles {
        self.files
            .iter()
            .filter_map(|f| f.staged_path.as_ref().map(|p| (f.name.clone(), p.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_file_becomes_fenced_part() {
        let parts = parts_for_file("notes.md", "application/octet-stream", b"# hi").unwrap();
        assert_eq!(parts.len(), 1);
        let text = parts[0].as_text().unwrap();
        assert!(text.contains("[Attached File: notes.md]"));
        assert!(text.contains("```\n# hi\n```"));
    }

    #[test]
    fn test_pdf_and_images_are_blobs() {
        let parts = parts_for_file("a.pdf", "application/pdf", b"%PDF").unwrap();
        assert!(matches!(&parts[0], Part::Blob { mime_type, .. } if mime_type == "application/pdf"));

        let parts = parts_for_file("a.png", "image/png", &[0x89, 0x50]).unwrap();
        assert!(parts[0].as_text().is_none());
    }

    #[test]
    fn test_unsupported_and_undecodable() {
        assert!(matches!(
            parts_for_file("a.bin", "application/octet-stream", b"x"),
            Err(UploadError::Unsupported { .. })
        ));
        assert!(matches!(
            parts_for_file("a.txt", "text/plain", &[0xff, 0xfe]),
            Err(UploadError::NotUtf8(_))
        ));
    }

    #[test]
    fn test_queue_replaces_same_name_and_maps_staged_paths() {
        let mut queue = UploadQueue::new();
        queue.push(PendingFile::from_bytes("data.csv", "text/csv", b"a,b").unwrap());
        queue.push(
            PendingFile::from_bytes("data.csv", "text/csv", b"a,b\n1,2")
                .unwrap()
                .with_staged_path("/tmp/ws/data.csv"),
        );
        queue.push(PendingFile::from_bytes("x.txt", "text/plain", b"x").unwrap());

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.parts().len(), 2);
        let files = queue.available_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files["data.csv"], PathBuf::from("/tmp/ws/data.csv"));
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("x.PNG")), "image/png");
        assert_eq!(guess_mime_type(Path::new("x.csv")), "text/csv");
        assert_eq!(guess_mime_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_common_attachments_are_accepted() {
        for name in ["page.html", "config.yaml", "icon.svg", "notes.xml", "data.tsv", "photo.bmp"] {
            let mime_type = guess_mime_type(Path::new(name));
            assert_ne!(mime_type, "application/octet-stream", "{name}");
            let parts = parts_for_file(name, &mime_type, b"<x/>");
            assert!(parts.is_ok(), "{name} ({mime_type}) rejected");
        }

        let parts = parts_for_file("icon.svg", &guess_mime_type(Path::new("icon.svg")), b"<svg/>").unwrap();
        assert!(matches!(&parts[0], Part::Blob { mime_type, .. } if mime_type == "image/svg+xml"));
        let parts = parts_for_file("config.yaml", &guess_mime_type(Path::new("config.yaml")), b"a: 1").unwrap();
        assert!(parts[0].as_text().unwrap().contains("a: 1"));
    }
}
