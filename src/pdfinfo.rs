use crate::error::{RectoError, Result, lopdf_read_err};
use crate::types::PageBox;
use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId};
use std::path::Path;

// Page attributes that may be declared on an ancestor Pages node.
pub(crate) const INHERITABLE_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct PdfInfo {
    pub pdf_version: String,
    pub page_count: usize,
    pub first_page_box: PageBox,
    pub last_page_box: PageBox,
    pub file_size_bytes: usize,
}

/// Reads page count and page geometry of a PDF on disk. Encrypted or
/// page-less files are rejected.
pub fn inspect_pdf(path: &Path) -> Result<PdfInfo> {
    let data = std::fs::read(path).map_err(|err| RectoError::read(path, err.to_string()))?;
    let doc = LoDocument::load_mem(&data).map_err(|err| lopdf_read_err(path, err))?;
    let info = inspect_document(path, &doc)?;
    Ok(PdfInfo {
        file_size_bytes: data.len(),
        ..info
    })
}

pub fn page_count(path: &Path) -> Result<usize> {
    Ok(inspect_pdf(path)?.page_count)
}

/// Loads a PDF for merging after the same compatibility checks `inspect_pdf`
/// applies.
pub(crate) fn load_document(path: &Path) -> Result<LoDocument> {
    let doc = LoDocument::load(path).map_err(|err| lopdf_read_err(path, err))?;
    require_composable(path, &doc)?;
    Ok(doc)
}

fn require_composable(path: &Path, doc: &LoDocument) -> Result<()> {
    if doc.is_encrypted() {
        return Err(RectoError::read(path, "encrypted pdf is not supported"));
    }
    if doc.get_pages().is_empty() {
        return Err(RectoError::read(path, "pdf has no pages"));
    }
    Ok(())
}

fn inspect_document(path: &Path, doc: &LoDocument) -> Result<PdfInfo> {
    require_composable(path, doc)?;
    let pages = doc.get_pages();
    let first = pages.values().next().copied();
    let last = pages.values().next_back().copied();
    let box_of = |id: Option<ObjectId>| {
        id.map(|id| page_box(doc, id)).unwrap_or(PageBox::LETTER)
    };
    Ok(PdfInfo {
        pdf_version: doc.version.clone(),
        page_count: pages.len(),
        first_page_box: box_of(first),
        last_page_box: box_of(last),
        file_size_bytes: 0,
    })
}

fn resolve<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> Option<&'a LoObject> {
    match obj {
        LoObject::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Looks up `key` on the page, then on each ancestor Pages node.
pub(crate) fn inherited_attribute(
    doc: &LoDocument,
    page_id: ObjectId,
    key: &[u8],
) -> Option<LoObject> {
    let mut current: &LoDictionary = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return resolve(doc, value).cloned();
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_object(parent).ok()?.as_dict().ok()?;
    }
    None
}

/// Visible page rectangle: CropBox, then MediaBox, then US Letter.
pub fn page_box(doc: &LoDocument, page_id: ObjectId) -> PageBox {
    for key in [&b"CropBox"[..], &b"MediaBox"[..]] {
        if let Some(LoObject::Array(values)) = inherited_attribute(doc, page_id, key) {
            let values: Vec<LoObject> = values
                .iter()
                .filter_map(|v| resolve(doc, v).cloned())
                .collect();
            if let Some(found) = PageBox::from_objects(&values) {
                return found;
            }
        }
    }
    PageBox::LETTER
}
