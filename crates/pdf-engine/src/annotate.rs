//! QR overlay annotation for page 1 of an existing PDF.
//!
//! The annotator draws, at an [`AnnotationTarget`]:
//! - the QR raster as an image XObject, `qr_size` square, bottom-left at `(x, y)`
//! - a caption line at `(x, y - 12)`, Helvetica 9, black
//! - the display text of the link at `(x, y - 22)`, Helvetica 8, blue, underlined at `y - 23`
//! - a `/Link` annotation with a `/URI` action over the display text
//!
//! Everything else in the document is kept as loaded. Other pages are never touched.

use crate::metrics::{self, HELVETICA};
use doc_model::AnnotationTarget;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

pub const CAPTION_SIZE: f32 = 9.0;
pub const LINK_SIZE: f32 = 8.0;
pub const CAPTION_OFFSET: f32 = 12.0;
pub const LINK_OFFSET: f32 = 22.0;
pub const UNDERLINE_OFFSET: f32 = 23.0;
pub const UNDERLINE_THICKNESS: f32 = 0.5;
pub const RECT_BOTTOM_OFFSET: f32 = 25.0;
pub const RECT_TOP_PADDING: f32 = 2.0;
pub const DEFAULT_CAPTION: &str = "Access the video:";

const LINK_BLUE: [f32; 3] = [0.0, 0.0, 1.0];

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("failed to load PDF: {0}")]
    Load(#[source] lopdf::Error),
    #[error("document has no pages")]
    NoPages,
    #[error("encrypted PDFs cannot be annotated")]
    Encrypted,
    #[error("malformed page structure: {0}")]
    Malformed(&'static str),
    #[error("invalid QR image: {0}")]
    Image(#[from] image::ImageError),
    #[error("PDF object error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize PDF: {0}")]
    Serialize(String),
    #[error("annotator panicked: {0}")]
    Panicked(String),
}

impl AnnotateError {
    /// Whether the failure comes from the source document rather than the QR input.
    pub fn is_document_error(&self) -> bool {
        !matches!(self, Self::Image(_))
    }
}

/// Geometry of the caption, link text, underline and clickable rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkLayout {
    pub caption_origin: (f32, f32),
    pub link_origin: (f32, f32),
    pub text_width: f32,
    pub text_height: f32,
    pub underline: ((f32, f32), (f32, f32)),
    /// `[x0, y0, x1, y1]` in native units.
    pub link_rect: [f32; 4],
}

impl LinkLayout {
    pub fn compute(target: &AnnotationTarget) -> Self {
        let (x, y) = (target.x(), target.y());
        let text_width = metrics::text_width(&target.display_text, LINK_SIZE);
        let text_height = metrics::text_height(LINK_SIZE);

        Self {
            caption_origin: (x, y - CAPTION_OFFSET),
            link_origin: (x, y - LINK_OFFSET),
            text_width,
            text_height,
            underline: ((x, y - UNDERLINE_OFFSET), (x + text_width, y - UNDERLINE_OFFSET)),
            link_rect: [
                x,
                y - RECT_BOTTOM_OFFSET,
                x + text_width,
                y - LINK_OFFSET + text_height + RECT_TOP_PADDING,
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnotatedDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
    pub layout: LinkLayout,
}

#[derive(Debug, Clone)]
pub struct Annotator {
    caption: String,
}

impl Default for Annotator {
    fn default() -> Self {
        Self { caption: DEFAULT_CAPTION.to_owned() }
    }
}

impl Annotator {
    pub fn new(caption: impl Into<String>) -> Self {
        Self { caption: caption.into() }
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn annotate(
        &self,
        source: &[u8],
        qr_png: &[u8],
        target: &AnnotationTarget,
    ) -> Result<AnnotatedDocument, AnnotateError> {
        let mut doc = Document::load_mem(source).map_err(AnnotateError::Load)?;
        if crate::is_encrypted(&doc) {
            return Err(AnnotateError::Encrypted);
        }

        let pages = doc.get_pages();
        let page_count = pages.len();
        let page_id = *pages.get(&1).ok_or(AnnotateError::NoPages)?;

        let qr = image::load_from_memory(qr_png)?;
        let image_id = add_image_xobject(&mut doc, &qr)?;
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => HELVETICA,
            "Encoding" => "WinAnsiEncoding",
        });

        let mut resources = page_resources(&doc, page_id)?;
        let image_name = register_resource(&doc, &mut resources, b"XObject", "QrImg", image_id)?;
        let font_name = register_resource(&doc, &mut resources, b"Font", "QrFont", font_id)?;
        page_dict_mut(&mut doc, page_id)?.set("Resources", Object::Dictionary(resources));

        let layout = LinkLayout::compute(target);
        let overlay = overlay_content(&self.caption, target, &layout, image_name, font_name);
        wrap_contents(&mut doc, page_id, overlay.encode()?)?;

        let annotation_id = doc.add_object(link_annotation(&layout, &target.url));
        append_annotation(&mut doc, page_id, annotation_id)?;

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).map_err(|err| AnnotateError::Serialize(err.to_string()))?;

        log::debug!(
            "annotated page 1 of {page_count} at ({:.1}, {:.1}), link rect {:?}",
            target.x(),
            target.y(),
            layout.link_rect
        );

        Ok(AnnotatedDocument { bytes, page_count, layout })
    }

    /// Runs [`Annotator::annotate`], turning a panic inside the PDF library into an error.
    pub fn annotate_supervised(
        &self,
        source: &[u8],
        qr_png: &[u8],
        target: &AnnotationTarget,
    ) -> Result<AnnotatedDocument, AnnotateError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.annotate(source, qr_png, target)))
            .unwrap_or_else(|payload| Err(AnnotateError::Panicked(panic_message(&payload))))
    }
}

/// Annotates with the default caption and returns the new document bytes.
pub fn annotate(
    source: &[u8],
    qr_png: &[u8],
    target: &AnnotationTarget,
) -> Result<Vec<u8>, AnnotateError> {
    Annotator::default().annotate(source, qr_png, target).map(|doc| doc.bytes)
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary, AnnotateError> {
    Ok(doc.get_object_mut(page_id)?.as_dict_mut()?)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, AnnotateError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn add_image_xobject(doc: &mut Document, image: &DynamicImage) -> Result<ObjectId, AnnotateError> {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    for pixel in rgba.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel[3]);
    }

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };

    if alpha.iter().any(|value| *value < u8::MAX) {
        let smask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        );
        dict.set("SMask", doc.add_object(smask));
    }

    Ok(doc.add_object(Stream::new(dict, deflate(&rgb)?)))
}

/// Resources in effect for a page, inherited ones included, as an owned dictionary.
fn page_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary, AnnotateError> {
    let mut current = Some(page_id);

    for _ in 0..crate::MAX_INHERITANCE_DEPTH {
        let Some(id) = current else {
            break;
        };
        let dict = doc.get_dictionary(id)?;
        if let Ok(resources) = dict.get(b"Resources") {
            return resolve_dict(doc, resources, "Resources is not a dictionary");
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    Ok(Dictionary::new())
}

fn resolve_dict(
    doc: &Document,
    object: &Object,
    context: &'static str,
) -> Result<Dictionary, AnnotateError> {
    match object {
        Object::Dictionary(dict) => Ok(dict.clone()),
        Object::Reference(id) => match doc.get_object(*id)? {
            Object::Dictionary(dict) => Ok(dict.clone()),
            _ => Err(AnnotateError::Malformed(context)),
        },
        _ => Err(AnnotateError::Malformed(context)),
    }
}

fn register_resource(
    doc: &Document,
    resources: &mut Dictionary,
    category: &[u8],
    prefix: &str,
    object_id: ObjectId,
) -> Result<Vec<u8>, AnnotateError> {
    let mut entries = match resources.get(category) {
        Ok(existing) => resolve_dict(doc, existing, "resource category is not a dictionary")?,
        Err(_) => Dictionary::new(),
    };

    let name = unique_name(&entries, prefix);
    entries.set(name.clone(), Object::Reference(object_id));
    resources.set(category.to_vec(), Object::Dictionary(entries));

    Ok(name)
}

fn unique_name(entries: &Dictionary, prefix: &str) -> Vec<u8> {
    let mut counter = 0u32;
    loop {
        let candidate = if counter == 0 {
            prefix.as_bytes().to_vec()
        } else {
            format!("{prefix}{counter}").into_bytes()
        };
        if !entries.has(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn real(value: f32) -> Object {
    Object::Real(value.into())
}

fn overlay_content(
    caption: &str,
    target: &AnnotationTarget,
    layout: &LinkLayout,
    image_name: Vec<u8>,
    font_name: Vec<u8>,
) -> Content {
    let (x, y, size) = (target.x(), target.y(), target.qr_size);
    let [r, g, b] = LINK_BLUE;

    let text = |origin: (f32, f32), font_size: f32, color: [f32; 3], body: &str| {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(font_name.clone()), real(font_size)]),
            Operation::new("rg", color.iter().copied().map(real).collect()),
            Operation::new("Td", vec![real(origin.0), real(origin.1)]),
            Operation::new(
                "Tj",
                vec![Object::String(metrics::encode_win_ansi(body), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ]
    };

    let mut operations = vec![
        // Closes the `q` pushed in front of the original content.
        Operation::new("Q", vec![]),
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![real(size), real(0.0), real(0.0), real(size), real(x), real(y)],
        ),
        Operation::new("Do", vec![Object::Name(image_name)]),
        Operation::new("Q", vec![]),
        Operation::new("q", vec![]),
    ];

    operations.extend(text(layout.caption_origin, CAPTION_SIZE, [0.0, 0.0, 0.0], caption));
    operations.extend(text(layout.link_origin, LINK_SIZE, LINK_BLUE, &target.display_text));

    let ((x0, y0), (x1, y1)) = layout.underline;
    operations.extend([
        Operation::new("RG", vec![real(r), real(g), real(b)]),
        Operation::new("w", vec![real(UNDERLINE_THICKNESS)]),
        Operation::new("m", vec![real(x0), real(y0)]),
        Operation::new("l", vec![real(x1), real(y1)]),
        Operation::new("S", vec![]),
        Operation::new("Q", vec![]),
    ]);

    Content { operations }
}

/// Puts the original content inside `q ... Q` and appends the overlay stream.
fn wrap_contents(
    doc: &mut Document,
    page_id: ObjectId,
    overlay: Vec<u8>,
) -> Result<(), AnnotateError> {
    let existing: Vec<Object> = match doc.get_dictionary(page_id)?.get(b"Contents") {
        Ok(Object::Array(items)) => items.clone(),
        Ok(Object::Reference(id)) => match doc.get_object(*id)? {
            Object::Array(items) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(_) => return Err(AnnotateError::Malformed("Contents is neither a stream nor an array")),
        Err(_) => Vec::new(),
    };

    let save_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let overlay_id = doc.add_object(Stream::new(Dictionary::new(), overlay));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(save_id));
    contents.extend(existing);
    contents.push(Object::Reference(overlay_id));

    page_dict_mut(doc, page_id)?.set("Contents", Object::Array(contents));
    Ok(())
}

fn link_annotation(layout: &LinkLayout, url: &str) -> Dictionary {
    let [x0, y0, x1, y1] = layout.link_rect;

    dictionary! {
        "Type" => "Annot",
        "Subtype" => "Link",
        "Rect" => vec![real(x0), real(y0), real(x1), real(y1)],
        "Border" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(0)],
        "C" => LINK_BLUE.iter().copied().map(real).collect::<Vec<_>>(),
        "A" => dictionary! {
            "Type" => "Action",
            "S" => "URI",
            "URI" => Object::string_literal(url),
        },
    }
}

/// Appends to the page's `Annots`, whether inline or indirect, creating it when absent.
fn append_annotation(
    doc: &mut Document,
    page_id: ObjectId,
    annotation_id: ObjectId,
) -> Result<(), AnnotateError> {
    let annots = doc.get_dictionary(page_id)?.get(b"Annots").ok().cloned();

    match annots {
        Some(Object::Reference(array_id)) => {
            doc.get_object_mut(array_id)?.as_array_mut()?.push(Object::Reference(annotation_id));
        }
        Some(Object::Array(mut items)) => {
            items.push(Object::Reference(annotation_id));
            page_dict_mut(doc, page_id)?.set("Annots", Object::Array(items));
        }
        Some(_) => return Err(AnnotateError::Malformed("Annots is not an array")),
        None => {
            page_dict_mut(doc, page_id)?
                .set("Annots", Object::Array(vec![Object::Reference(annotation_id)]));
        }
    }

    Ok(())
}
