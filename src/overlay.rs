use crate::debug::BuildLog;
use crate::error::{RectoError, Result, lopdf_page_err, lopdf_read_err};
use crate::font::{FontRole, FontSet, pdf_literal};
use crate::manifest::{HeaderContent, PageLayout, PageNumberPosition};
use crate::mapping::{MappedPage, PageMapping};
use crate::merge::save_deterministic;
use crate::numbering::{PageNumberTracker, Region};
use crate::pdfinfo;
use crate::types::{Margins, PageBox, fmt_num};
use lopdf::{
    Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId,
    Stream as LoStream, dictionary,
};
use serde::Serialize;
use std::path::Path;

const HEADER_FONT_KEY: &str = "RectoHd";
const NUMBER_FONT_KEY: &str = "RectoPn";

/// What the overlay pass decided for one physical page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StampRecord {
    pub physical_page: usize,
    pub output_index: usize,
    pub region: Region,
    /// Counter value of the page, advanced whether or not it is printed.
    pub number_value: usize,
    pub number: Option<String>,
    pub header: Option<String>,
}

impl StampRecord {
    pub fn is_empty(&self) -> bool {
        self.number.is_none() && self.header.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverlaySummary {
    pub stamps: Vec<StampRecord>,
}

impl OverlaySummary {
    pub fn pages_numbered(&self) -> usize {
        self.stamps.iter().filter(|s| s.number.is_some()).count()
    }

    pub fn pages_headed(&self) -> usize {
        self.stamps.iter().filter(|s| s.header.is_some()).count()
    }

    pub fn by_physical_page(&self, physical_page: usize) -> Option<&StampRecord> {
        self.stamps.iter().find(|s| s.physical_page == physical_page)
    }

    pub fn extend(&mut self, other: OverlaySummary) {
        self.stamps.extend(other.stamps);
    }
}

pub struct OverlayEngine<'a> {
    layout: &'a PageLayout,
    fonts: &'a FontSet,
    margins: Margins,
}

impl<'a> OverlayEngine<'a> {
    pub fn new(layout: &'a PageLayout, fonts: &'a FontSet, margins: Margins) -> Self {
        Self {
            layout,
            fonts,
            margins,
        }
    }

    fn header_text(&self, page: &MappedPage<'_>) -> Option<String> {
        if !page.should_show_header() {
            return None;
        }
        let policy = if page.is_verso() {
            self.layout.verso_header
        } else {
            self.layout.recto_header
        };
        let text = match policy {
            HeaderContent::BookTitle => Some(self.layout.book_title.clone()),
            HeaderContent::SectionTitle => page.item.part_title.clone(),
            HeaderContent::EssayTitle => Some(page.item.title.clone()),
            HeaderContent::Off => None,
        };
        text.filter(|t| !t.trim().is_empty())
    }

    /// Decides every page's stamps, advancing `tracker` once per page.
    pub fn plan(&self, mapping: &PageMapping<'_>, tracker: &mut PageNumberTracker) -> OverlaySummary {
        let stamps = mapping
            .pages()
            .iter()
            .map(|page| {
                let number_value = tracker.advance(page.region());
                let number = page
                    .should_show_page_number(self.layout)
                    .then(|| page.number_style().format(number_value));
                StampRecord {
                    physical_page: page.physical_page,
                    output_index: page.output_index,
                    region: page.region(),
                    number_value,
                    number,
                    header: self.header_text(page),
                }
            })
            .collect();
        OverlaySummary { stamps }
    }

    fn number_ops(&self, page: &MappedPage<'_>, page_box: PageBox, text: &str) -> String {
        let size = self.layout.typography.page_number_size;
        let width = self.fonts.measure(FontRole::PageNumber, size, text);
        let x = match self.layout.page_number_position {
            PageNumberPosition::Outer if page.is_recto() => page_box.urx - self.margins.side - width,
            PageNumberPosition::Outer => page_box.llx + self.margins.side,
            _ => page_box.llx + (page_box.width() - width) / 2.0,
        };
        let y = page_box.lly + self.margins.footer_from_bottom;
        text_op(NUMBER_FONT_KEY, size, x, y, text)
    }

    fn header_ops(&self, page: &MappedPage<'_>, page_box: PageBox, text: &str) -> String {
        let size = self.layout.typography.header_size;
        let x = if page.is_verso() {
            page_box.llx + self.margins.side
        } else {
            let width = self.fonts.measure(FontRole::Header, size, text);
            page_box.urx - self.margins.side - width
        };
        let y = page_box.ury - self.margins.header_from_top - size;
        text_op(HEADER_FONT_KEY, size, x, y, text)
    }

    /// Stamps `pdf` in place according to `mapping` and saves it once.
    pub fn apply(
        &self,
        pdf: &Path,
        mapping: &PageMapping<'_>,
        tracker: &mut PageNumberTracker,
        log: Option<&BuildLog>,
    ) -> Result<OverlaySummary> {
        let summary = self.plan(mapping, tracker);
        let mut doc = LoDocument::load(pdf).map_err(|err| lopdf_read_err(pdf, err))?;
        let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        if page_ids.len() != mapping.len() {
            return Err(RectoError::Render(format!(
                "{} has {} pages but the mapping covers {}",
                pdf.display(),
                page_ids.len(),
                mapping.len()
            )));
        }

        let mut font_ids: Option<(ObjectId, ObjectId)> = None;
        for (stamp, page) in summary.stamps.iter().zip(mapping.pages()) {
            if let Some(log) = log {
                log.log_json(&serde_json::json!({
                    "type": "overlay.page",
                    "page": stamp.physical_page,
                    "region": stamp.region,
                    "value": stamp.number_value,
                    "number": stamp.number,
                    "header": stamp.header,
                }));
            }
            if stamp.is_empty() {
                continue;
            }
            let page_id = page_ids[page.output_index];
            let page_box = pdfinfo::page_box(&doc, page_id);
            let mut ops = String::from("Q\nq 0 g\n");
            if let Some(text) = &stamp.header {
                ops.push_str(&self.header_ops(page, page_box, text));
            }
            if let Some(text) = &stamp.number {
                ops.push_str(&self.number_ops(page, page_box, text));
            }
            ops.push_str("Q\n");

            let (header_font, number_font) = *font_ids.get_or_insert_with(|| {
                (
                    self.fonts.font(FontRole::Header).install(&mut doc),
                    self.fonts.font(FontRole::PageNumber).install(&mut doc),
                )
            });
            stamp_page(&mut doc, page_id, ops.into_bytes(), header_font, number_font)
                .map_err(|err| match err {
                    RectoError::RenderPage { message, .. } => RectoError::RenderPage {
                        page: stamp.physical_page,
                        message,
                    },
                    other => other,
                })?;
        }

        save_deterministic(doc, pdf)?;
        if let Some(log) = log {
            log.increment("pages.numbered", summary.pages_numbered() as u64);
            log.increment("pages.headed", summary.pages_headed() as u64);
        }
        tracing::info!(
            pdf = %pdf.display(),
            numbered = summary.pages_numbered(),
            headed = summary.pages_headed(),
            "overlay applied"
        );
        Ok(summary)
    }
}

fn text_op(font_key: &str, size: f32, x: f32, y: f32, text: &str) -> String {
    format!(
        "BT /{} {} Tf {} {} Td {} Tj ET\n",
        font_key,
        fmt_num(size),
        fmt_num(x),
        fmt_num(y),
        pdf_literal(text)
    )
}

fn resolved_dict(doc: &LoDocument, value: Option<&LoObject>) -> LoDictionary {
    match value {
        Some(LoObject::Dictionary(d)) => d.clone(),
        Some(LoObject::Reference(id)) => doc
            .get_object(*id)
            .and_then(LoObject::as_dict)
            .cloned()
            .unwrap_or_default(),
        _ => LoDictionary::new(),
    }
}

// Page content is wrapped in q/Q so the original graphics state cannot leak
// into the stamp; the overlay stream opens with the closing Q.
fn stamp_page(
    doc: &mut LoDocument,
    page_id: ObjectId,
    overlay: Vec<u8>,
    header_font: ObjectId,
    number_font: ObjectId,
) -> Result<()> {
    let page = doc
        .get_object(page_id)
        .and_then(LoObject::as_dict)
        .map_err(|err| lopdf_page_err(0, err))?
        .clone();
    let mut resources = match page.get(b"Resources").ok() {
        Some(value) => resolved_dict(doc, Some(value)),
        None => match pdfinfo::inherited_attribute(doc, page_id, b"Resources") {
            Some(LoObject::Dictionary(d)) => d,
            _ => LoDictionary::new(),
        },
    };
    let mut fonts = resolved_dict(doc, resources.get(b"Font").ok());
    fonts.set(HEADER_FONT_KEY, header_font);
    fonts.set(NUMBER_FONT_KEY, number_font);
    resources.set("Font", LoObject::Dictionary(fonts));

    let mut contents: Vec<LoObject> = match page.get(b"Contents").ok() {
        Some(LoObject::Reference(id)) => match doc.get_object(*id) {
            Ok(LoObject::Array(items)) => items.clone(),
            _ => vec![LoObject::Reference(*id)],
        },
        Some(LoObject::Array(items)) => items.clone(),
        Some(_) => {
            return Err(RectoError::RenderPage {
                page: 0,
                message: "page contents are not a stream reference".to_string(),
            });
        }
        None => Vec::new(),
    };
    let open_id = doc.add_object(LoStream::new(dictionary! {}, b"q\n".to_vec()));
    let overlay_id = doc.add_object(LoStream::new(dictionary! {}, overlay));
    contents.insert(0, LoObject::Reference(open_id));
    contents.push(LoObject::Reference(overlay_id));

    let page_mut = doc
        .get_object_mut(page_id)
        .and_then(LoObject::as_dict_mut)
        .map_err(|err| lopdf_page_err(0, err))?;
    page_mut.set("Resources", LoObject::Dictionary(resources));
    page_mut.set("Contents", LoObject::Array(contents));
    Ok(())
}
