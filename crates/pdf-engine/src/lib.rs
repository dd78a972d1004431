use image::{ImageBuffer, Rgba};
use lopdf::{Document, Object, ObjectId};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub mod annotate;
pub mod metrics;
pub mod qr;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use annotate::{
    annotate, panic_message, AnnotateError, AnnotatedDocument, Annotator, LinkLayout,
};
pub use qr::{QrCodeEncoder, QrEncoder, QrError};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// US Letter, used when neither the page nor its ancestors carry a MediaBox.
pub const DEFAULT_PAGE_SIZE: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

// Parent chains deeper than this are treated as cyclic.
pub(crate) const MAX_INHERITANCE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    /// Pixel size of a preview `target_width` pixels wide that keeps the page aspect ratio.
    pub fn preview_dimensions(&self, target_width: u32) -> (u32, u32) {
        let width = target_width.max(1);
        if self.width_pt <= 0.0 || self.height_pt <= 0.0 {
            return (width, width);
        }

        let height = (width as f32 * self.height_pt / self.width_pt).round().max(1.0) as u32;
        (width, height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewRequest {
    pub page_index: u32,
    pub target_width: u32,
}

impl Default for PreviewRequest {
    fn default() -> Self {
        Self { page_index: 0, target_width: 600 }
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for OpenSource {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Document renderer used by the placement preview.
pub trait PdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError>;
    fn render_preview(
        &self,
        handle: DocumentHandle,
        request: PreviewRequest,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    page_sizes: Vec<PageSize>,
}

/// Whether the trailer declares an encryption dictionary.
pub(crate) fn is_encrypted(doc: &Document) -> bool {
    doc.trailer.get(b"Encrypt").is_ok()
}

// Only consulted when lopdf could not load the document at all.
fn has_encrypt_key(bytes: &[u8]) -> bool {
    bytes.windows(b"/Encrypt".len()).any(|window| window == b"/Encrypt")
}

/// Default backend: reads geometry with lopdf and rasterizes a blank page outline.
#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, PdfEngineError> {
        let doc = match Document::load_mem(bytes) {
            Ok(doc) => doc,
            Err(err) if has_encrypt_key(bytes) => {
                log::debug!("unreadable document with an Encrypt entry: {err}");
                return Err(PdfEngineError::EncryptedUnsupported);
            }
            Err(err) => return Err(err.into()),
        };
        if is_encrypted(&doc) {
            return Err(PdfEngineError::EncryptedUnsupported);
        }
        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            sizes.push(page_media_box(&doc, object_id).unwrap_or(DEFAULT_PAGE_SIZE));
        }

        if sizes.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(sizes)
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let page_sizes = Self::parse_sizes(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        log::debug!("opened document {} with {} page(s)", handle.raw(), page_sizes.len());
        self.docs.insert(handle, DocumentRecord { page_sizes });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.page_sizes.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        let record = self.record(handle)?;
        record.page_sizes.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: record.page_sizes.len() as u32,
        })
    }

    fn render_preview(
        &self,
        handle: DocumentHandle,
        request: PreviewRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let page_size = self.page_size(handle, request.page_index)?;
        let (width, height) = page_size.preview_dimensions(request.target_width);

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, Rgba([220, 220, 220, 255]));
                image.put_pixel(x, height - 1, Rgba([220, 220, 220, 255]));
            }
            for y in 0..height {
                image.put_pixel(0, y, Rgba([220, 220, 220, 255]));
                image.put_pixel(width - 1, y, Rgba([220, 220, 220, 255]));
            }
        }

        Ok(image)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

/// MediaBox of a page, following the `Parent` chain for inherited values.
pub(crate) fn page_media_box(doc: &Document, page_id: ObjectId) -> Option<PageSize> {
    let mut current = Some(page_id);

    for _ in 0..MAX_INHERITANCE_DEPTH {
        let dict = doc.get_dictionary(current?).ok()?;

        if let Ok(raw) = dict.get(b"MediaBox") {
            let resolved = match raw {
                Object::Reference(id) => doc.get_object(*id).ok()?,
                other => other,
            };
            let array = resolved.as_array().ok()?;
            if array.len() != 4 {
                return None;
            }
            let x0 = obj_to_f32(&array[0])?;
            let y0 = obj_to_f32(&array[1])?;
            let x1 = obj_to_f32(&array[2])?;
            let y1 = obj_to_f32(&array[3])?;
            return Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() });
        }

        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    None
}

pub(crate) fn obj_to_f32(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_pdf, SampleSpec};
    use lopdf::dictionary;

    #[test]
    fn opens_pdf_and_reads_page_count() {
        let mut engine = LopdfEngine::new();
        let handle = engine
            .open(OpenSource::Bytes(sample_pdf(&SampleSpec::default())))
            .expect("open should succeed");

        assert_eq!(engine.page_count(handle).expect("count should succeed"), 1);
    }

    #[test]
    fn page_size_is_inherited_from_pages_node() {
        let spec = SampleSpec { pages: 3, ..SampleSpec::default() };
        let mut engine = LopdfEngine::new();
        let handle = engine.open(OpenSource::Bytes(sample_pdf(&spec))).expect("open should succeed");

        let size = engine.page_size(handle, 2).expect("page size should resolve");
        assert_eq!(size, PageSize { width_pt: 595.0, height_pt: 842.0 });
    }

    #[test]
    fn render_preview_keeps_aspect_ratio() {
        let mut engine = LopdfEngine::new();
        let handle = engine
            .open(OpenSource::Bytes(sample_pdf(&SampleSpec::default())))
            .expect("open should succeed");

        let image = engine
            .render_preview(handle, PreviewRequest { page_index: 0, target_width: 600 })
            .expect("preview should render");

        assert_eq!(image.width(), 600);
        assert_eq!(image.height(), 849);
    }

    #[test]
    fn out_of_range_page_is_reported() {
        let mut engine = LopdfEngine::new();
        let handle = engine
            .open(OpenSource::Bytes(sample_pdf(&SampleSpec::default())))
            .expect("open should succeed");

        let err = engine.page_size(handle, 5).expect_err("page 5 should not exist");
        assert!(matches!(err, PdfEngineError::PageOutOfRange { page: 5, page_count: 1 }));
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        let mut engine = LopdfEngine::new();
        let err = engine
            .open(OpenSource::Bytes(b"not a pdf at all".to_vec()))
            .expect_err("garbage should not parse");

        assert!(matches!(err, PdfEngineError::Parse(_)));
    }

    #[test]
    fn encrypted_marker_is_rejected() {
        let mut engine = LopdfEngine::new();
        let err = engine
            .open(OpenSource::Bytes(b"%PDF-1.4\n/Encrypt 5 0 R\n".to_vec()))
            .expect_err("encrypted marker should be rejected");

        assert!(matches!(err, PdfEngineError::EncryptedUnsupported));
    }

    #[test]
    fn encrypt_trailer_is_rejected() {
        let mut doc = Document::load_mem(&sample_pdf(&SampleSpec::default())).expect("sample");
        doc.trailer.set("Encrypt", Object::Dictionary(lopdf::dictionary! { "Filter" => "Standard" }));
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save");

        let err = LopdfEngine::new()
            .open(OpenSource::Bytes(bytes))
            .expect_err("encrypted trailer should be rejected");
        assert!(matches!(err, PdfEngineError::EncryptedUnsupported));
    }

    #[test]
    fn encrypt_token_in_content_is_not_encryption() {
        let mut doc = Document::load_mem(&sample_pdf(&SampleSpec::default())).expect("sample");
        let info = doc.add_object(lopdf::dictionary! {
            "Title" => Object::string_literal("see /Encrypt in the glossary"),
        });
        doc.trailer.set("Info", info);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save");
        assert!(has_encrypt_key(&bytes));

        let mut engine = LopdfEngine::new();
        let handle = engine.open(OpenSource::Bytes(bytes)).expect("plain document should open");
        assert_eq!(engine.page_count(handle).expect("count"), 1);
    }

    #[test]
    fn invalid_handle_returns_error() {
        let engine = LopdfEngine::new();
        let err =
            engine.page_count(DocumentHandle(999)).expect_err("should fail for unknown handle");

        assert!(matches!(err, PdfEngineError::InvalidHandle(999)));
    }

    #[test]
    fn preview_dimensions_never_collapse_to_zero() {
        let size = PageSize { width_pt: 595.0, height_pt: 842.0 };

        assert_eq!(size.preview_dimensions(0), (1, 1));
        assert_eq!(size.preview_dimensions(600), (600, 849));
    }
}
