//! Page-level text extraction for PDF files.
//!
//! Each PDF becomes one [`PageDocument`] per page, numbered from 0, so that
//! citations can point back at the page a chunk came from. Extraction
//! failures never panic the indexer: they surface as [`QaError::Load`] and
//! the caller skips the file.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::error::QaError;
use crate::models::PageDocument;

/// Extraction error for a single PDF.
#[derive(Debug)]
pub enum ExtractError {
    NotPdf,
    Pdf(String),
    Panicked,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::NotPdf => write!(f, "missing %PDF header"),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Panicked => write!(f, "PDF parser aborted on malformed input"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract the text of every page, in page order.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    if !bytes.starts_with(b"%PDF-") {
        return Err(ExtractError::NotPdf);
    }

    // The parser can panic on some malformed files; one bad file must not
    // take the whole indexing run down with it.
    panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }))
    .map_err(|_| ExtractError::Panicked)?
    .map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Read a PDF from disk and return one document per page.
pub fn load_pdf(path: &Path) -> Result<Vec<PageDocument>, QaError> {
    let load_err = |reason: String| QaError::Load {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| load_err(e.to_string()))?;
    let pages = extract_pdf_pages(&bytes).map_err(|e| load_err(e.to_string()))?;
    let source = path.to_string_lossy().into_owned();

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageDocument {
            source: source.clone(),
            page: i as i64,
            text,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal valid PDF with one text line per page.
    /// Body first, then the xref table with the real byte offsets so
    /// pdf-extract can parse it.
    fn minimal_pdf(pages: &[&str]) -> Vec<u8> {
        let font_id = 3 + 2 * pages.len();
        let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();

        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages.len()),
        ];
        for (i, text) in pages.iter().enumerate() {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R \
                 /Resources << /Font << /F1 {} 0 R >> >> >>",
                4 + 2 * i,
                font_id
            ));
            let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
            objects.push(format!(
                "<< /Length {} >> stream\n{}\nendstream",
                content.len(),
                content
            ));
        }
        objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());

        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
        }
        let xref_start = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(
            format!("trailer << /Size {} /Root 1 0 R >>\nstartxref\n", objects.len() + 1).as_bytes(),
        );
        out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
        out.extend_from_slice(b"%%EOF\n");
        out
    }

    #[test]
    fn extracts_each_page_in_order() {
        let pdf = minimal_pdf(&["Wudu is invalidated by sleep", "Zakat on gold"]);
        let pages = extract_pdf_pages(&pdf).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].trim(), "Wudu is invalidated by sleep");
        assert_eq!(pages[1].trim(), "Zakat on gold");
    }

    #[test]
    fn load_pdf_numbers_pages_from_zero() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("kitab.pdf");
        std::fs::write(&path, minimal_pdf(&["Wudu is invalidated by sleep", "Zakat on gold"]))
            .unwrap();

        let docs = load_pdf(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].page, 0);
        assert_eq!(docs[1].page, 1);
        assert!(docs[1].text.contains("Zakat on gold"));
        assert!(docs.iter().all(|d| d.source.ends_with("kitab.pdf")));
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = extract_pdf_pages(b"hello, I am a text file").unwrap_err();
        assert!(matches!(err, ExtractError::NotPdf));
    }

    #[test]
    fn truncated_pdf_is_an_error_not_a_panic() {
        let result = extract_pdf_pages(b"%PDF-1.4\n1 0 obj << /Type /Catalog");
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_load_error() {
        let err = load_pdf(Path::new("/nonexistent/kitab.pdf")).unwrap_err();
        match err {
            QaError::Load { path, .. } => assert!(path.ends_with("kitab.pdf")),
            other => panic!("expected Load error, got {other:?}"),
        }
    }
}
