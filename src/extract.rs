//! Page-ordered text extraction from uploaded bytes
//!
//! PDFs go through `pdf-extract` one page at a time. Plain UTF-8 text is
//! accepted too, with form feeds as page breaks. Extracted pages are cleaned
//! line by line, and a paragraph break is restored wherever a line ends a
//! sentence and the next one starts with a capital letter.

use crate::retrieval::RetrievalError;

const PDF_MAGIC: &[u8] = b"%PDF";
const PAGE_BREAK: char = '\x0c';

/// Extract page texts from raw document bytes
///
/// Returns one entry per page, in page order. Pages may be empty; deciding
/// whether the document as a whole has content is left to the chunker.
pub fn extract_pages(bytes: &[u8], filename: &str) -> Result<Vec<String>, RetrievalError> {
    if bytes.is_empty() {
        return Err(RetrievalError::Ingestion(format!(
            "{}: no bytes uploaded",
            filename
        )));
    }

    let raw_pages = if is_pdf(bytes, filename) {
        extract_pdf(bytes, filename)?
    } else {
        extract_plain_text(bytes, filename)?
    };

    Ok(raw_pages.iter().map(|page| clean_page(page)).collect())
}

fn is_pdf(bytes: &[u8], filename: &str) -> bool {
    bytes.starts_with(PDF_MAGIC) || filename.to_ascii_lowercase().ends_with(".pdf")
}

fn extract_pdf(bytes: &[u8], filename: &str) -> Result<Vec<String>, RetrievalError> {
    // pdf-extract panics on some malformed inputs
    let outcome =
        std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes));

    match outcome {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(RetrievalError::Ingestion(format!(
            "{}: unreadable PDF: {}",
            filename, e
        ))),
        Err(_) => Err(RetrievalError::Ingestion(format!(
            "{}: PDF parser aborted",
            filename
        ))),
    }
}

fn extract_plain_text(bytes: &[u8], filename: &str) -> Result<Vec<String>, RetrievalError> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        RetrievalError::Ingestion(format!(
            "{}: neither a PDF nor UTF-8 text ({})",
            filename, e
        ))
    })?;

    Ok(text.split(PAGE_BREAK).map(str::to_string).collect())
}

/// Trim lines, drop blank ones, and re-insert paragraph breaks at sentence ends
fn clean_page(page: &str) -> String {
    let lines: Vec<&str> = page
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let mut out = String::with_capacity(page.len());
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
            if ends_sentence(lines[i - 1]) && starts_upper(line) {
                out.push('\n');
            }
        }
        out.push_str(line);
    }
    out
}

fn ends_sentence(line: &str) -> bool {
    matches!(line.chars().last(), Some('.' | '!' | '?' | ':'))
}

fn starts_upper(line: &str) -> bool {
    line.chars().next().is_some_and(char::is_uppercase)
}
