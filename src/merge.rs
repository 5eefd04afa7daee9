use crate::analyzer::{AnalysisResult, ItemKind};
use crate::error::{RectoError, Result, lopdf_read_err};
use crate::font::LoadedFont;
use crate::mapping::PageMapping;
use crate::pdfinfo::{self, INHERITABLE_KEYS, inherited_attribute};
use crate::types::PageBox;
use lopdf::{
    Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId,
    Stream as LoStream, dictionary,
};
use std::ops::Range;
use std::path::{Path, PathBuf};

const PDF_VERSION: &str = "1.7";
const PRODUCER: &str = "recto";

/// Document information written to every assembled file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocInfo {
    pub title: String,
    pub author: String,
}

impl DocInfo {
    fn install(&self, doc: &mut LoDocument) {
        let mut info = dictionary! {
            "Producer" => LoObject::string_literal(PRODUCER),
        };
        if !self.title.is_empty() {
            info.set("Title", LoObject::string_literal(self.title.as_str()));
        }
        if !self.author.is_empty() {
            info.set("Author", LoObject::string_literal(self.author.as_str()));
        }
        let info_id = doc.add_object(info);
        doc.trailer.set("Info", info_id);
    }
}

/// Concatenates whole PDFs page by page into a fresh document.
pub struct Assembler {
    doc: LoDocument,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
    last_box: Option<PageBox>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        let mut doc = LoDocument::with_version(PDF_VERSION);
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
            last_box: None,
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Box of the most recently appended page.
    pub fn last_page_box(&self) -> Option<PageBox> {
        self.last_box
    }

    pub fn append_file(&mut self, path: &Path) -> Result<usize> {
        let src = pdfinfo::load_document(path)?;
        self.append_document(src, path)
    }

    /// Imports every page of `src`. Attributes the pages inherited from
    /// their old page tree are copied onto the pages themselves.
    pub fn append_document(&mut self, mut src: LoDocument, origin: &Path) -> Result<usize> {
        if src.is_encrypted() {
            return Err(RectoError::read(origin, "encrypted pdf is not supported"));
        }
        src.renumber_objects_with(self.doc.max_id + 1);
        let page_ids: Vec<ObjectId> = src.get_pages().values().copied().collect();
        for page_id in &page_ids {
            let page_box = pdfinfo::page_box(&src, *page_id);
            let mut inherited: Vec<(&[u8], LoObject)> = Vec::new();
            for key in INHERITABLE_KEYS {
                let own = src
                    .get_object(*page_id)
                    .and_then(LoObject::as_dict)
                    .map(|d| d.has(key))
                    .map_err(|err| lopdf_read_err(origin, err))?;
                if !own {
                    if let Some(value) = inherited_attribute(&src, *page_id, key) {
                        inherited.push((key, value));
                    }
                }
            }
            let page = src
                .get_object_mut(*page_id)
                .and_then(LoObject::as_dict_mut)
                .map_err(|err| lopdf_read_err(origin, err))?;
            for (key, value) in inherited {
                page.set(key.to_vec(), value);
            }
            if !page.has(b"MediaBox") {
                page.set("MediaBox", PageBox::LETTER.to_objects());
            }
            page.set("Parent", self.pages_id);
            self.last_box = Some(page_box);
        }
        if src.max_id > self.doc.max_id {
            self.doc.max_id = src.max_id;
        }
        self.doc.objects.extend(src.objects);
        self.kids.extend(&page_ids);
        Ok(page_ids.len())
    }

    pub fn finish(mut self, out: &Path, info: &DocInfo) -> Result<()> {
        let kids: Vec<LoObject> = self.kids.iter().map(|id| LoObject::Reference(*id)).collect();
        self.doc.objects.insert(
            self.pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.kids.len() as i64,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        info.install(&mut self.doc);
        save_deterministic(self.doc, out)
    }
}

pub(crate) fn save_deterministic(mut doc: LoDocument, out: &Path) -> Result<()> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();
    doc.save(out)?;
    Ok(())
}

/// A page to be written from scratch.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub page_box: PageBox,
    pub ops: Vec<u8>,
}

/// Writes a document whose pages share one resource dictionary holding
/// `fonts` under the given resource names.
pub fn save_page_document(
    out: &Path,
    pages: &[PageContent],
    fonts: &[(&str, &LoadedFont)],
    title: Option<&str>,
) -> Result<()> {
    let mut doc = LoDocument::with_version(PDF_VERSION);
    let pages_id = doc.new_object_id();
    let mut font_dict = LoDictionary::new();
    let mut installed: Vec<(&LoadedFont, ObjectId)> = Vec::new();
    for &(name, font) in fonts {
        // Roles sharing one font share one font object.
        let id = match installed.iter().find(|(seen, _)| std::ptr::eq(*seen, font)) {
            Some((_, id)) => *id,
            None => {
                let id = font.install(&mut doc);
                installed.push((font, id));
                id
            }
        };
        font_dict.set(name.as_bytes().to_vec(), id);
    }
    let resources_id = doc.add_object(dictionary! { "Font" => font_dict });
    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        let content_id = doc.add_object(LoStream::new(dictionary! {}, page.ops.clone()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => page.page_box.to_objects(),
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(LoObject::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    DocInfo {
        title: title.unwrap_or_default().to_string(),
        author: String::new(),
    }
    .install(&mut doc);
    save_deterministic(doc, out)
}

/// One-page blank filler of the given size, created on first use.
pub fn blank_filler(build_dir: &Path, page_box: PageBox) -> Result<PathBuf> {
    let path = build_dir.join(format!("blank-{}.pdf", page_box.size_key()));
    if !path.is_file() {
        let page = PageContent {
            page_box,
            ops: Vec::new(),
        };
        save_page_document(&path, &[page], &[], None)?;
        tracing::debug!(path = %path.display(), "blank filler created");
    }
    Ok(path)
}

/// Merges the items in `range` into `out`, returning the page mapping of the
/// merged file.
pub fn merge_items<'a>(
    analysis: &'a AnalysisResult,
    range: Range<usize>,
    build_dir: &Path,
    out: &Path,
    info: &DocInfo,
) -> Result<PageMapping<'a>> {
    std::fs::create_dir_all(build_dir)?;
    let mut assembler = Assembler::new();
    let mut mapping = PageMapping::default();
    let items = analysis.items.get(range.clone()).unwrap_or_default();
    for (offset, item) in items.iter().enumerate() {
        let item_index = range.start + offset;
        let appended = if item.kind == ItemKind::Blank {
            let page_box = match assembler.last_page_box() {
                Some(found) => found,
                None => preceding_page_box(analysis, item_index),
            };
            let filler = blank_filler(build_dir, page_box)?;
            assembler.append_file(&filler)?
        } else {
            let path = item.pdf.as_deref().ok_or_else(|| match item.kind {
                ItemKind::Toc => RectoError::Render("table of contents was not rendered".to_string()),
                _ => RectoError::Render(format!("`{}` has no pdf", item.title)),
            })?;
            let appended = assembler.append_file(path)?;
            if appended != item.page_count {
                return Err(RectoError::read(
                    path,
                    format!(
                        "page count changed since analysis: expected {}, found {}",
                        item.page_count, appended
                    ),
                ));
            }
            appended
        };
        debug_assert_eq!(appended, item.page_count);
        mapping.push_item(item_index, item);
    }
    assembler.finish(out, info)?;
    tracing::info!(
        out = %out.display(),
        pages = mapping.len(),
        items = items.len(),
        "merged"
    );
    Ok(mapping)
}

/// Merges every item of the analysis.
pub fn merge_analysis<'a>(
    analysis: &'a AnalysisResult,
    build_dir: &Path,
    out: &Path,
    info: &DocInfo,
) -> Result<PageMapping<'a>> {
    merge_items(analysis, 0..analysis.items.len(), build_dir, out, info)
}

// Blank at the start of a slice: size it after the closest earlier real page.
fn preceding_page_box(analysis: &AnalysisResult, item_index: usize) -> PageBox {
    analysis.items[..item_index]
        .iter()
        .rev()
        .find_map(|item| item.pdf.as_deref())
        .and_then(|path| pdfinfo::inspect_pdf(path).ok())
        .map(|info| info.last_page_box)
        .unwrap_or(PageBox::LETTER)
}

/// Concatenates whole files in order; returns the total page count.
pub fn concat_pdfs(inputs: &[PathBuf], out: &Path, info: &DocInfo) -> Result<usize> {
    let mut assembler = Assembler::new();
    for input in inputs {
        assembler.append_file(input)?;
    }
    let total = assembler.page_count();
    assembler.finish(out, info)?;
    Ok(total)
}
