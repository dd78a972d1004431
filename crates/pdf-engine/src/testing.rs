//! Sample documents and inspection helpers for tests.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};

#[derive(Debug, Clone, Copy)]
pub struct SampleSpec {
    pub pages: u32,
    /// Text annotations already present on page 1.
    pub existing_annotations: u32,
    /// Store page 1's `Annots` as an indirect array object.
    pub indirect_annots: bool,
    pub media_box: (f32, f32),
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self { pages: 1, existing_annotations: 0, indirect_annots: false, media_box: (595.0, 842.0) }
    }
}

fn real(value: f32) -> Object {
    Object::Real(value.into())
}

/// Builds a document whose font resources and MediaBox are inherited from the page tree root.
pub fn sample_pdf(spec: &SampleSpec) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for page_number in 1..=spec.pages.max(1) {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("Hello {page_number}"))]),
                Operation::new("ET", vec![]),
            ],
        };
        let encoded = content.encode().expect("sample content should encode");
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        };

        if page_number == 1 && spec.existing_annotations > 0 {
            let annots: Vec<Object> = (0..spec.existing_annotations)
                .map(|index| {
                    let offset = 20.0 * index as f32;
                    doc.add_object(dictionary! {
                        "Type" => "Annot",
                        "Subtype" => "Text",
                        "Rect" => vec![
                            real(50.0 + offset),
                            real(50.0),
                            real(70.0 + offset),
                            real(70.0),
                        ],
                        "Contents" => Object::string_literal(format!("note {index}")),
                    })
                    .into()
                })
                .collect();

            if spec.indirect_annots {
                let array_id = doc.add_object(Object::Array(annots));
                page.set("Annots", array_id);
            } else {
                page.set("Annots", Object::Array(annots));
            }
        }

        kids.push(Object::Reference(doc.add_object(page)));
    }

    let (width, height) = spec.media_box;
    let count = kids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            real(width),
            real(height),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("sample document should serialize");
    bytes
}

fn page_annots(doc: &Document, page: &Dictionary) -> Vec<Object> {
    match page.get(b"Annots") {
        Ok(Object::Array(items)) => items.clone(),
        Ok(Object::Reference(id)) => doc
            .get_object(*id)
            .and_then(Object::as_array)
            .map(|items| items.clone())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Number of annotations on each page, in page order.
pub fn annotation_counts(bytes: &[u8]) -> Vec<usize> {
    let doc = Document::load_mem(bytes).expect("document should load");

    doc.get_pages()
        .values()
        .map(|page_id| {
            let page = doc.get_dictionary(*page_id).expect("page dictionary");
            page_annots(&doc, page).len()
        })
        .collect()
}

/// `/Link` annotation dictionaries on page 1.
pub fn link_annotations(bytes: &[u8]) -> Vec<Dictionary> {
    let doc = Document::load_mem(bytes).expect("document should load");
    let page_id = *doc.get_pages().get(&1).expect("page 1 should exist");
    let page = doc.get_dictionary(page_id).expect("page dictionary");

    page_annots(&doc, page)
        .iter()
        .filter_map(|item| item.as_reference().ok())
        .filter_map(|id| doc.get_dictionary(id).ok())
        .filter(|annot| matches!(annot.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Link"))
        .cloned()
        .collect()
}

pub fn uri_of(annotation: &Dictionary) -> Option<String> {
    let action = annotation.get(b"A").and_then(Object::as_dict).ok()?;
    match action.get(b"URI").ok()? {
        Object::String(bytes, _) => String::from_utf8(bytes.clone()).ok(),
        _ => None,
    }
}

pub fn rect_of(annotation: &Dictionary) -> Option<[f32; 4]> {
    let rect = annotation.get(b"Rect").and_then(Object::as_array).ok()?;
    if rect.len() != 4 {
        return None;
    }

    Some([
        crate::obj_to_f32(&rect[0])?,
        crate::obj_to_f32(&rect[1])?,
        crate::obj_to_f32(&rect[2])?,
        crate::obj_to_f32(&rect[3])?,
    ])
}
