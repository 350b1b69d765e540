//! Blocking text extractors for document attachments.
//!
//! Each extractor takes the decoded bytes and returns plain text or a
//! human-readable reason. Callers run them on the blocking pool.

use std::io::{Cursor, Read};

use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound on `word/document.xml` after decompression (32 MB).
const MAX_DOCUMENT_XML_SIZE: u64 = 32 * 1024 * 1024;

static PARAGRAPH_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</w:p>").unwrap());
static LINE_BREAK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<w:(br|cr)\s*/>").unwrap());
static TAB_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<w:tab\s*/>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

pub(crate) fn pdf_text(bytes: &[u8]) -> Result<String, String> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())?;
    let text = text.trim();
    if text.is_empty() {
        return Err("the PDF contains no extractable text".to_string());
    }
    Ok(text.to_string())
}

/// Raw text of a `.docx` document: paragraphs become lines, formatting is dropped.
pub(crate) fn docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a Word document: {e}"))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml is missing".to_string())?;

    let mut xml = String::new();
    entry
        .take(MAX_DOCUMENT_XML_SIZE)
        .read_to_string(&mut xml)
        .map_err(|e| format!("unreadable document body: {e}"))?;

    let text = PARAGRAPH_END_RE.replace_all(&xml, "\n");
    let text = LINE_BREAK_RE.replace_all(&text, "\n");
    let text = TAB_RE.replace_all(&text, "\t");
    let text = TAG_RE.replace_all(&text, "");
    let text = decode_xml_entities(&text);
    let text = BLANK_LINES_RE.replace_all(text.trim(), "\n\n");

    if text.is_empty() {
        return Err("the document contains no text".to_string());
    }
    Ok(text.into_owned())
}

/// Names of the files inside a ZIP archive, in archive order.
pub(crate) fn zip_listing(bytes: &[u8]) -> Result<Vec<String>, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a ZIP archive: {e}"))?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(|e| e.to_string())?;
        if !entry.is_dir() {
            names.push(entry.name().to_string());
        }
    }
    Ok(names)
}

fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    pub(crate) fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub(crate) fn build_docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document><w:body>{body}</w:body></w:document>"#
        );
        build_zip(&[("[Content_Types].xml", "<Types/>"), ("word/document.xml", &xml)])
    }

    #[test]
    fn test_docx_paragraphs_become_lines() {
        let bytes = build_docx(&["Quarterly report", "Revenue &amp; costs"]);
        assert_eq!(docx_text(&bytes).unwrap(), "Quarterly report\nRevenue & costs");
    }

    #[test]
    fn test_docx_without_body_fails() {
        let bytes = build_zip(&[("readme.txt", "hi")]);
        assert!(docx_text(&bytes).unwrap_err().contains("word/document.xml"));
    }

    #[test]
    fn test_zip_listing_skips_directories() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .add_directory("src/", SimpleFileOptions::default())
            .unwrap();
        writer
            .start_file("src/main.rs", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"fn main() {}").unwrap();
        writer
            .start_file("Cargo.toml", SimpleFileOptions::default())
            .unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert_eq!(zip_listing(&bytes).unwrap(), vec!["src/main.rs", "Cargo.toml"]);
    }

    #[test]
    fn test_garbage_is_not_a_pdf() {
        assert!(pdf_text(b"definitely not a pdf").is_err());
    }
}
