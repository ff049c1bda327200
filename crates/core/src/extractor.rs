use crate::error::IngestError;
use crate::models::PageText;
use lopdf::Document;

const PDF_MAGIC: &[u8] = b"%PDF";

pub trait PdfExtractor {
    /// Returns page texts in page order. Pages without text are skipped.
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(IngestError::Extraction(
                "input is not a pdf document".to_string(),
            ));
        }

        let document = Document::load_mem(bytes)
            .map_err(|error| IngestError::Extraction(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::Extraction(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        // image-only scans; there is no OCR step to recover their text
        if pages.is_empty() {
            return Err(IngestError::Extraction(
                "pdf has no text layer on any page".to_string(),
            ));
        }

        Ok(pages)
    }
}

/// Joins page texts the way they are stored as a document's raw content.
pub fn concatenate_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_pdf_bytes_are_rejected() {
        let result = LopdfExtractor.extract_pages(b"plain text, not a pdf");
        assert!(matches!(result, Err(IngestError::Extraction(_))));
    }

    #[test]
    fn truncated_pdf_is_an_extraction_error() {
        let result = LopdfExtractor.extract_pages(b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(IngestError::Extraction(_))));
    }

    fn blank_single_page_pdf() -> Vec<u8> {
        use lopdf::{dictionary, Object, Stream};

        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let content_id = document.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        document.save_to(&mut bytes).expect("in-memory pdf");
        bytes
    }

    #[test]
    fn pdf_without_text_layer_is_rejected() {
        let bytes = blank_single_page_pdf();
        assert!(bytes.starts_with(PDF_MAGIC));

        let result = LopdfExtractor.extract_pages(&bytes);
        assert!(matches!(result, Err(IngestError::Extraction(_))));
    }

    #[test]
    fn pages_are_joined_with_newlines() {
        let pages = vec![
            PageText {
                number: 1,
                text: "first".to_string(),
            },
            PageText {
                number: 2,
                text: "second".to_string(),
            },
        ];
        assert_eq!(concatenate_pages(&pages), "first\nsecond");
    }
}
