//! Plain-text extraction from docx containers.
//!
//! A docx file is a zip archive; the body lives in `word/document.xml`.
//! Only the markup needed for text and pagination is interpreted:
//! paragraph ends become newlines and explicit page breaks delimit pages.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use zip::ZipArchive;

use crate::core::errors::ApiError;

const PAGE_BREAK: char = '\u{0C}';

fn page_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<w:br[^>]*w:type="page"[^>]*/?>|<w:lastRenderedPageBreak\s*/?>"#)
            .expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

/// Extracts the document text as one string per page.
///
/// Documents without explicit page breaks come back as a single page.
pub fn extract_pages(path: &Path) -> Result<Vec<String>, ApiError> {
    let file = File::open(path)
        .map_err(|e| ApiError::Internal(format!("open {}: {}", path.display(), e)))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| ApiError::BadRequest(format!("{} is not a docx: {}", path.display(), e)))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| {
            ApiError::BadRequest(format!("{} has no document body: {}", path.display(), e))
        })?
        .read_to_string(&mut xml)
        .map_err(|e| ApiError::Internal(format!("read {}: {}", path.display(), e)))?;

    Ok(pages_from_xml(&xml))
}

fn pages_from_xml(xml: &str) -> Vec<String> {
    let marked = page_break_re().replace_all(xml, PAGE_BREAK.to_string());
    let marked = marked
        .replace("</w:p>", "\n")
        .replace("<w:tab/>", "\t");
    let stripped = tag_re().replace_all(&marked, "");
    let decoded = decode_entities(&stripped);

    let pages: Vec<String> = decoded
        .split(PAGE_BREAK)
        .map(|page| {
            page.lines()
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .collect();

    // A trailing break should not produce a phantom empty page.
    let mut pages = pages;
    while pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
        pages.pop();
    }
    pages
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
