//! Turns a user-selected file into an [`Attachment`] the model can consume.
//!
//! Images and PDFs travel as base64; plain text and Word documents are
//! reduced to text. Anything else is rejected.

use base64::{ engine::general_purpose::STANDARD, Engine as _ };
use log::{ debug, warn };
use std::io::{ Cursor, Read };
use std::path::Path;
use zip::ZipArchive;

use crate::error::{ ChatError, ChatResult };
use crate::models::chat::{ Attachment, AttachmentKind };

pub const PDF_MIME: &str = "application/pdf";
pub const TEXT_MIME: &str = "text/plain";
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const DOCX_BODY_ENTRY: &str = "word/document.xml";

/// A raw file as handed over by the file input collaborator.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Image,
    Pdf,
    PlainText,
    Docx,
}

fn essence(mime_type: &str) -> String {
    mime_type.split(';').next().unwrap_or("").trim().to_lowercase()
}

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
}

fn classify(mime_type: &str, file_name: &str) -> Option<FileFormat> {
    let mime = essence(mime_type);
    let ext = extension(file_name);

    if mime.starts_with("image/") {
        return Some(FileFormat::Image);
    }
    if mime == PDF_MIME {
        return Some(FileFormat::Pdf);
    }
    if ext.as_deref() == Some("docx") || mime == DOCX_MIME {
        return Some(FileFormat::Docx);
    }
    if mime == TEXT_MIME || ext.as_deref() == Some("txt") {
        return Some(FileFormat::PlainText);
    }
    None
}

/// Normalizes exactly one file. Callers iterate for multiple files and must not
/// keep anything when this fails.
pub fn normalize(file: RawFile) -> ChatResult<Attachment> {
    let format = classify(&file.mime_type, &file.file_name).ok_or_else(|| {
        warn!("Rejecting attachment '{}' with type '{}'", file.file_name, file.mime_type);
        ChatError::UnsupportedAttachmentType {
            mime_type: file.mime_type.clone(),
            file_name: file.file_name.clone(),
        }
    })?;
    debug!("Normalizing '{}' ({} bytes) as {:?}", file.file_name, file.bytes.len(), format);

    let name = Some(file.file_name.clone()).filter(|n| !n.is_empty());
    let declared = |fallback: &str| {
        if file.mime_type.trim().is_empty() {
            fallback.to_string()
        } else {
            file.mime_type.clone()
        }
    };

    let attachment = match format {
        FileFormat::Image =>
            Attachment::encoded(
                AttachmentKind::Image,
                declared("image/*"),
                STANDARD.encode(&file.bytes),
                name
            ),
        FileFormat::Pdf =>
            Attachment::encoded(
                AttachmentKind::File,
                declared(PDF_MIME),
                STANDARD.encode(&file.bytes),
                name
            ),
        FileFormat::PlainText => {
            let text = String::from_utf8_lossy(&file.bytes).into_owned();
            Attachment::text(declared(TEXT_MIME), text, name)
        }
        FileFormat::Docx => {
            let text = extract_docx_text(&file.bytes)?;
            Attachment::text(declared(DOCX_MIME), text, name)
        }
    };
    Ok(attachment)
}

fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Strips WordprocessingML markup, keeping paragraph, tab and break structure.
fn document_xml_to_text(xml: &str) -> String {
    let with_breaks = xml
        .replace("</w:p>", "\n")
        .replace("<w:tab/>", "\t")
        .replace("<w:br/>", "\n");

    let mut result = String::with_capacity(with_breaks.len());
    let mut in_tag = false;
    for ch in with_breaks.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    decode_xml_entities(&result)
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

pub fn extract_docx_text(bytes: &[u8]) -> ChatResult<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e|
        ChatError::AttachmentExtraction(format!("Failed to open document container: {}", e))
    )?;
    let mut entry = archive
        .by_name(DOCX_BODY_ENTRY)
        .map_err(|e|
            ChatError::AttachmentExtraction(format!("Missing {}: {}", DOCX_BODY_ENTRY, e))
        )?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e|
            ChatError::AttachmentExtraction(format!("Failed to read {}: {}", DOCX_BODY_ENTRY, e))
        )?;

    Ok(document_xml_to_text(&xml))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn raw(bytes: &[u8], mime_type: &str, file_name: &str) -> RawFile {
        RawFile {
            bytes: bytes.to_vec(),
            mime_type: mime_type.to_string(),
            file_name: file_name.to_string(),
        }
    }

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("[Content_Types].xml", FileOptions::default()).unwrap();
        writer.write_all(b"<Types/>").unwrap();
        writer.start_file(DOCX_BODY_ENTRY, FileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn text_file_becomes_text_attachment() {
        let att = normalize(raw(b"hello", "text/plain", "notes.txt")).unwrap();
        assert!(att.is_text);
        assert_eq!(att.data, "hello");
        assert_eq!(att.kind, AttachmentKind::File);
        assert_eq!(att.name.as_deref(), Some("notes.txt"));
    }

    #[test]
    fn txt_extension_without_media_type_is_text() {
        let att = normalize(raw(b"plain", "", "readme.txt")).unwrap();
        assert!(att.is_text);
        assert_eq!(att.mime_type, TEXT_MIME);
    }

    #[test]
    fn txt_extension_wins_over_generic_binary_type() {
        let att = normalize(raw(b"hello", "application/octet-stream", "notes.txt")).unwrap();
        assert!(att.is_text);
        assert_eq!(att.data, "hello");
        assert_eq!(att.kind, AttachmentKind::File);
    }

    #[test]
    fn images_are_base64_encoded() {
        let att = normalize(raw(&[0x89, b'P', b'N', b'G'], "image/png", "pic.png")).unwrap();
        assert!(!att.is_text);
        assert_eq!(att.kind, AttachmentKind::Image);
        assert_eq!(att.data, "iVBORw==");
        assert_eq!(att.mime_type, "image/png");
    }

    #[test]
    fn pdf_is_an_encoded_file() {
        let att = normalize(raw(b"%PDF-1.7", "application/pdf", "paper.pdf")).unwrap();
        assert!(!att.is_text);
        assert_eq!(att.kind, AttachmentKind::File);
        assert_eq!(STANDARD.decode(&att.data).unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn docx_text_is_extracted() {
        let body = concat!(
            r#"<w:document><w:body>"#,
            r#"<w:p><w:r><w:t>Quarterly &amp; yearly</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>Revenue</w:t><w:tab/><w:t>42</w:t></w:r></w:p>"#,
            r#"</w:body></w:document>"#
        );
        let att = normalize(raw(&docx_with_body(body), "", "report.docx")).unwrap();
        assert!(att.is_text);
        assert_eq!(att.mime_type, DOCX_MIME);
        assert_eq!(att.data, "Quarterly & yearly\nRevenue\t42");
    }

    #[test]
    fn malformed_docx_is_an_extraction_failure() {
        let err = normalize(raw(b"not a zip", DOCX_MIME, "broken.docx")).unwrap_err();
        assert!(matches!(err, ChatError::AttachmentExtraction(_)));
    }

    #[test]
    fn docx_without_body_is_an_extraction_failure() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("other.xml", FileOptions::default()).unwrap();
        writer.write_all(b"<x/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert!(matches!(extract_docx_text(&bytes), Err(ChatError::AttachmentExtraction(_))));
    }

    #[test]
    fn unsupported_types_are_rejected() {
        let err = normalize(raw(b"{}", "application/json", "data.json")).unwrap_err();
        match err {
            ChatError::UnsupportedAttachmentType { mime_type, file_name } => {
                assert_eq!(mime_type, "application/json");
                assert_eq!(file_name, "data.json");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn media_type_parameters_are_ignored() {
        let att = normalize(raw(b"hi", "text/plain; charset=utf-8", "a.txt")).unwrap();
        assert!(att.is_text);
        assert_eq!(att.mime_type, "text/plain; charset=utf-8");
    }
}
