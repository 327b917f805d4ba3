//! One-page PDF receipt: product fields printed over the first page of a
//! template PDF, or over a blank page when no template is configured.

use std::sync::Arc;

use anyhow::Context;
use encoding_rs::WINDOWS_1252;
use lopdf::{
    content::{Content, Operation},
    dictionary, Dictionary, Document, Object, ObjectId, Stream,
};

use crate::{
    config::{ReceiptConfig, TextSlot},
    products::repo_types::ProductSummary,
};

const MAX_TREE_DEPTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The standard Type1 fonts only cover WinAnsi (CP1252).
    #[error("{0} contains characters the receipt font cannot print")]
    Unprintable(&'static str),
    #[error("build receipt pdf")]
    Pdf(#[from] lopdf::Error),
}

/// Holds the parsed template so every receipt starts from a fresh copy.
#[derive(Debug, Clone)]
pub struct ReceiptRenderer {
    cfg: Arc<ReceiptConfig>,
    template: Option<Arc<Document>>,
}

impl ReceiptRenderer {
    /// Loads the template up front: a missing or unreadable file fails startup.
    pub fn new(cfg: Arc<ReceiptConfig>) -> anyhow::Result<Self> {
        let template = match cfg.template_path() {
            Some(path) => {
                let doc = Document::load(&path)
                    .with_context(|| format!("load receipt template {}", path.display()))?;
                if doc.get_pages().is_empty() {
                    anyhow::bail!("receipt template {} has no pages", path.display());
                }
                Some(Arc::new(doc))
            }
            None => None,
        };
        Ok(Self { cfg, template })
    }

    /// Prints barcode, name and cost at the configured slots. Slot
    /// coordinates are measured from the top-left corner of the page.
    pub fn render(&self, product: &ProductSummary) -> Result<Vec<u8>, RenderError> {
        let cfg = &*self.cfg;
        let fields = [
            (cfg.barcode, win_ansi("barcode", &product.barcode)?),
            (cfg.name, win_ansi("name", &product.name)?),
            (cfg.cost, win_ansi("cost", &product.cost.to_string())?),
        ];

        let (mut doc, page_id) = match &self.template {
            Some(template) => template_page(Document::clone(template))?,
            None => blank_page(cfg),
        };
        let top = page_top(&doc, page_id).unwrap_or(cfg.page_height);
        let font = attach_font(&mut doc, page_id, &cfg.font_name)?;

        let mut ops = Vec::new();
        for (slot, text) in fields {
            show(&mut ops, &font, top, slot, text);
        }
        let content = Content { operations: ops }.encode()?;
        doc.add_page_contents(page_id, content)?;
        doc.compress();

        let mut out = Vec::new();
        doc.save_to(&mut out).map_err(lopdf::Error::from)?;
        Ok(out)
    }
}

/// Transcodes to the WinAnsiEncoding the Type1 font is declared with.
fn win_ansi(field: &'static str, value: &str) -> Result<Vec<u8>, RenderError> {
    let (bytes, _, unmappable) = WINDOWS_1252.encode(value);
    if unmappable {
        return Err(RenderError::Unprintable(field));
    }
    Ok(bytes.into_owned())
}

fn blank_page(cfg: &ReceiptConfig) -> (Document, ObjectId) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), cfg.page_width.into(), cfg.page_height.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    (doc, page_id)
}

/// Keeps only the first page and fences its drawing in `q`/`Q` so any
/// transform it leaves behind does not move the printed fields.
fn template_page(mut doc: Document) -> Result<(Document, ObjectId), RenderError> {
    let pages = doc.get_pages();
    let page_id = *pages
        .values()
        .next()
        .ok_or(lopdf::Error::PageNumberNotFound(1))?;
    let rest: Vec<u32> = pages.keys().skip(1).copied().collect();
    if !rest.is_empty() {
        doc.delete_pages(&rest);
    }

    let existing = doc.get_page_contents(page_id);
    if !existing.is_empty() {
        let open = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
        let close = doc.add_object(Stream::new(dictionary! {}, b"\nQ\n".to_vec()));
        let mut contents: Vec<Object> = vec![open.into()];
        contents.extend(existing.into_iter().map(Object::Reference));
        contents.push(close.into());
        doc.get_dictionary_mut(page_id)?.set("Contents", contents);
    }
    Ok((doc, page_id))
}

/// Looks `key` up on the page, then along its `Parent` chain.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return doc.dereference(value).ok().map(|(_, v)| v);
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn page_top(doc: &Document, page_id: ObjectId) -> Option<i64> {
    let corners = inherited(doc, page_id, b"MediaBox")?.as_array().ok()?;
    let (_, top) = doc.dereference(corners.get(3)?).ok()?;
    Some(top.as_float().ok()?.round() as i64)
}

/// Adds a WinAnsi Type1 font to the page's own resources under a key the
/// template does not use, and returns that key.
fn attach_font(
    doc: &mut Document,
    page_id: ObjectId,
    base_font: &str,
) -> Result<String, RenderError> {
    let mut resources = inherited(doc, page_id, b"Resources")
        .and_then(|r| r.as_dict().ok())
        .cloned()
        .unwrap_or_else(Dictionary::new);
    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|f| doc.dereference(f).ok())
        .and_then(|(_, f)| f.as_dict().ok())
        .cloned()
        .unwrap_or_else(Dictionary::new);

    let mut n = 1;
    while fonts.has(format!("F{n}").as_bytes()) {
        n += 1;
    }
    let key = format!("F{n}");

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => Object::Name(base_font.as_bytes().to_vec()),
        "Encoding" => "WinAnsiEncoding",
    });
    fonts.set(key.clone(), font_id);
    resources.set("Font", fonts);
    doc.get_dictionary_mut(page_id)?.set("Resources", resources);
    Ok(key)
}

fn show(ops: &mut Vec<Operation>, font: &str, top: i64, slot: TextSlot, text: Vec<u8>) {
    // PDF user space starts bottom-left
    let y = top - slot.y;
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.into(), slot.font_size.into()]));
    ops.push(Operation::new("Td", vec![slot.x.into(), y.into()]));
    ops.push(Operation::new("Tj", vec![Object::string_literal(text)]));
    ops.push(Operation::new("ET", vec![]));
}
