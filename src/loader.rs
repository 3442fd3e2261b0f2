//! Document loading and text extraction.
//!
//! Dispatches on file extension to a closed set of format extractors
//! (plain text, PDF, Word). Produces the document's full text in reading
//! order plus page-offset metadata so chunks can later be traced back to
//! their position in the source.
//!
//! Loader failures happen before any asset row exists, so a missing or
//! unreadable file never leaves a partial asset behind.

use std::io::Read;
use std::path::Path;

use crate::error::{Result, ServiceError};

/// Supported document formats. Adding a format means adding a variant and
/// an arm in [`extract`] — dispatch itself does not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// `.txt` / `.md`
    Text,
    /// `.pdf`
    Pdf,
    /// `.doc` / `.docx` (OOXML; legacy binary .doc fails as unreadable)
    Docx,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Text => "text",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
        }
    }
}

/// Byte offset at which a page starts within the extracted text.
#[derive(Debug, Clone)]
pub struct PageSpan {
    /// 1-based page number.
    pub page: i64,
    pub start_offset: usize,
}

#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    pub format: DocumentFormat,
    /// Non-empty; single-page formats get one span at offset 0.
    pub pages: Vec<PageSpan>,
}

impl DocumentMetadata {
    /// Page containing the given byte offset.
    pub fn page_for_offset(&self, offset: usize) -> i64 {
        self.pages
            .iter()
            .rev()
            .find(|span| span.start_offset <= offset)
            .map(|span| span.page)
            .unwrap_or(1)
    }
}

#[derive(Debug)]
pub struct LoadedDocument {
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Detect the document format from the file extension.
pub fn detect_format(path: &Path) -> Result<DocumentFormat> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" => Ok(DocumentFormat::Text),
        "pdf" => Ok(DocumentFormat::Pdf),
        "doc" | "docx" => Ok(DocumentFormat::Docx),
        _ => Err(ServiceError::UnsupportedFormat(format!(".{}", ext))),
    }
}

/// Load a document: detect its format, extract its text, record page offsets.
pub fn load(path: &Path) -> Result<LoadedDocument> {
    let format = detect_format(path)?;

    match format {
        DocumentFormat::Text => {
            let text = std::fs::read_to_string(path).map_err(|e| read_error(path, e))?;
            Ok(LoadedDocument {
                text,
                metadata: single_page(DocumentFormat::Text),
            })
        }
        DocumentFormat::Pdf => {
            let bytes = std::fs::read(path).map_err(|e| read_error(path, e))?;
            extract_pdf(path, &bytes)
        }
        DocumentFormat::Docx => {
            let bytes = std::fs::read(path).map_err(|e| read_error(path, e))?;
            let text = extract_docx(&bytes).map_err(|reason| ServiceError::FileUnreadable {
                path: path.to_path_buf(),
                reason,
            })?;
            Ok(LoadedDocument {
                text,
                metadata: single_page(DocumentFormat::Docx),
            })
        }
    }
}

fn read_error(path: &Path, e: std::io::Error) -> ServiceError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ServiceError::FileNotFound(path.to_path_buf())
    } else {
        ServiceError::FileUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    }
}

fn single_page(format: DocumentFormat) -> DocumentMetadata {
    DocumentMetadata {
        format,
        pages: vec![PageSpan {
            page: 1,
            start_offset: 0,
        }],
    }
}

/// Extract a PDF page by page, preserving reading order. Pages are joined
/// with blank lines and their start offsets recorded for traceability.
fn extract_pdf(path: &Path, bytes: &[u8]) -> Result<LoadedDocument> {
    let pages =
        pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| {
            ServiceError::FileUnreadable {
                path: path.to_path_buf(),
                reason: format!("PDF extraction failed: {}", e),
            }
        })?;

    let mut text = String::new();
    let mut spans = Vec::with_capacity(pages.len());
    for (i, page_text) in pages.iter().enumerate() {
        if i > 0 {
            text.push_str("\n\n");
        }
        spans.push(PageSpan {
            page: (i + 1) as i64,
            start_offset: text.len(),
        });
        text.push_str(page_text.trim_end());
    }
    if spans.is_empty() {
        spans.push(PageSpan {
            page: 1,
            start_offset: 0,
        });
    }

    Ok(LoadedDocument {
        text,
        metadata: DocumentMetadata {
            format: DocumentFormat::Pdf,
            pages: spans,
        },
    })
}

/// Maximum decompressed bytes read from a ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract the `w:t` runs from `word/document.xml`, one line per paragraph.
fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| "word/document.xml not found".to_string())?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| e.to_string())?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err("word/document.xml exceeds size limit".to_string());
        }
    }

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(doc_xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                // Paragraph break — keep one per w:p so chunking can find
                // line boundaries.
                b"p" => {
                    if !out.ends_with('\n') && !out.is_empty() {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let body: String = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
                .collect();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = detect_format(Path::new("report.xlsx")).unwrap_err();
        assert_eq!(err.kind(), "unsupported_format");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = load(Path::new("/nonexistent/notes.txt")).unwrap_err();
        assert_eq!(err.kind(), "file_not_found");
    }

    #[test]
    fn text_file_loads_as_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "alpha\n\nbeta").unwrap();

        let doc = load(&path).unwrap();
        assert_eq!(doc.text, "alpha\n\nbeta");
        assert_eq!(doc.metadata.pages.len(), 1);
        assert_eq!(doc.metadata.page_for_offset(7), 1);
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let text = extract_docx(&docx_bytes(&["First paragraph.", "Second paragraph."])).unwrap();
        assert_eq!(text, "First paragraph.\nSecond paragraph.\n");
    }

    #[test]
    fn legacy_doc_bytes_are_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.doc");
        // Old OLE2 magic, not a ZIP — must fail, not panic.
        std::fs::write(&path, [0xD0u8, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]).unwrap();

        let err = load(&path).unwrap_err();
        assert_eq!(err.kind(), "file_unreadable");
    }

    #[test]
    fn corrupt_pdf_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();

        let err = load(&path).unwrap_err();
        assert_eq!(err.kind(), "file_unreadable");
    }

    #[test]
    fn page_for_offset_picks_latest_span() {
        let meta = DocumentMetadata {
            format: DocumentFormat::Pdf,
            pages: vec![
                PageSpan { page: 1, start_offset: 0 },
                PageSpan { page: 2, start_offset: 100 },
                PageSpan { page: 3, start_offset: 250 },
            ],
        };
        assert_eq!(meta.page_for_offset(0), 1);
        assert_eq!(meta.page_for_offset(99), 1);
        assert_eq!(meta.page_for_offset(100), 2);
        assert_eq!(meta.page_for_offset(1000), 3);
    }
}
