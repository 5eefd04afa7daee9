use crate::error::Result;
use crate::manifest::Manifest;
use crate::numbering::Region;
use crate::pdfinfo;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const DEFAULT_TOC_ESTIMATE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    FrontMatter,
    Toc,
    PartDivider,
    Work,
    BackMatter,
    Blank,
}

impl ItemKind {
    fn region(self) -> Option<Region> {
        match self {
            ItemKind::FrontMatter | ItemKind::Toc => Some(Region::Front),
            ItemKind::PartDivider | ItemKind::Work => Some(Region::Body),
            ItemKind::BackMatter => Some(Region::Back),
            ItemKind::Blank => None,
        }
    }
}

/// One contiguous run of physical pages in the book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentItem {
    pub kind: ItemKind,
    pub title: String,
    pub pdf: Option<PathBuf>,
    pub page_count: usize,
    pub start_page: usize,
    pub end_page: usize,
    pub region: Region,
    pub part_index: Option<usize>,
    pub part_title: Option<String>,
    pub work_id: Option<String>,
}

impl ContentItem {
    pub fn is_blank(&self) -> bool {
        self.kind == ItemKind::Blank
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartAnalysis {
    pub index: usize,
    pub key: String,
    pub title: String,
    pub start_page: usize,
    pub end_page: usize,
    pub work_count: usize,
    pub items: Range<usize>,
}

impl PartAnalysis {
    pub fn page_count(&self) -> usize {
        (self.end_page + 1).saturating_sub(self.start_page)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub items: Vec<ContentItem>,
    pub front_matter_pages: usize,
    pub body_pages: usize,
    pub back_matter_pages: usize,
    pub total_pages: usize,
    pub toc_index: Option<usize>,
    pub parts: Vec<PartAnalysis>,
}

impl AnalysisResult {
    pub fn work_count(&self) -> usize {
        self.items.iter().filter(|i| i.kind == ItemKind::Work).count()
    }

    pub fn toc(&self) -> Option<&ContentItem> {
        self.toc_index.and_then(|idx| self.items.get(idx))
    }

    /// Item indices of the pages numbered in `region`. Regions are laid out
    /// front, body, back, so the result is always contiguous.
    pub fn region_range(&self, region: Region) -> Range<usize> {
        let start = self.items.iter().position(|i| i.region == region);
        match start {
            Some(start) => {
                let len = self.items[start..]
                    .iter()
                    .take_while(|i| i.region == region)
                    .count();
                start..start + len
            }
            None => {
                let at = self
                    .items
                    .iter()
                    .position(|i| region_order(i.region) > region_order(region))
                    .unwrap_or(self.items.len());
                at..at
            }
        }
    }

    pub fn item_at_page(&self, physical_page: usize) -> Option<(usize, &ContentItem)> {
        self.items
            .iter()
            .enumerate()
            .find(|(_, i)| i.start_page <= physical_page && physical_page <= i.end_page)
    }
}

fn region_order(region: Region) -> u8 {
    match region {
        Region::Front => 0,
        Region::Body => 1,
        Region::Back => 2,
    }
}

/// Pages held for the table of contents and, once rendered, its PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocReservation {
    pub pages: usize,
    pub pdf: Option<PathBuf>,
}

impl TocReservation {
    pub fn estimate(pages: usize) -> Self {
        Self { pages, pdf: None }
    }

    pub fn rendered(pages: usize, pdf: PathBuf) -> Self {
        Self {
            pages,
            pdf: Some(pdf),
        }
    }
}

impl Default for TocReservation {
    fn default() -> Self {
        Self::estimate(DEFAULT_TOC_ESTIMATE)
    }
}

/// Assigns physical page ranges. Page counts are memoized per path so the
/// TOC correction rounds only read each source once.
#[derive(Debug, Default)]
pub struct Analyzer {
    page_counts: BTreeMap<PathBuf, usize>,
}

struct Placement<'a> {
    kind: ItemKind,
    title: String,
    pdf: Option<PathBuf>,
    pages: Option<usize>,
    recto: bool,
    part: Option<(usize, &'a str)>,
    work_id: Option<String>,
}

struct Cursor {
    next_page: usize,
    items: Vec<ContentItem>,
}

impl Cursor {
    fn place(&mut self, placement: Placement<'_>, page_count: usize) {
        if placement.recto && self.next_page % 2 == 0 {
            let (region, part_index, part_title) = match self.items.last() {
                Some(prev) => (prev.region, prev.part_index, prev.part_title.clone()),
                None => (Region::Front, None, None),
            };
            self.items.push(ContentItem {
                kind: ItemKind::Blank,
                title: String::new(),
                pdf: None,
                page_count: 1,
                start_page: self.next_page,
                end_page: self.next_page,
                region,
                part_index,
                part_title,
                work_id: None,
            });
            self.next_page += 1;
        }
        let region = placement.kind.region().unwrap_or(Region::Front);
        self.items.push(ContentItem {
            kind: placement.kind,
            title: placement.title,
            pdf: placement.pdf,
            page_count,
            start_page: self.next_page,
            end_page: self.next_page + page_count - 1,
            region,
            part_index: placement.part.map(|(idx, _)| idx),
            part_title: placement.part.map(|(_, title)| title.to_string()),
            work_id: placement.work_id,
        });
        self.next_page += page_count;
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    fn count_pages(&mut self, path: &Path) -> Result<usize> {
        if let Some(count) = self.page_counts.get(path) {
            return Ok(*count);
        }
        let count = pdfinfo::page_count(path)?;
        self.page_counts.insert(path.to_path_buf(), count);
        Ok(count)
    }

    pub fn analyze(
        &mut self,
        manifest: &Manifest,
        toc: &TocReservation,
    ) -> Result<AnalysisResult> {
        let placements = plan_placements(manifest, toc);
        let mut cursor = Cursor {
            next_page: 1,
            items: Vec::with_capacity(placements.len() + 4),
        };
        let mut toc_index = None;
        for placement in placements {
            let page_count = match (placement.pages, placement.pdf.as_deref()) {
                (Some(pages), _) => pages.max(1),
                (None, Some(path)) => self.count_pages(path)?,
                (None, None) => 1,
            };
            let is_toc = placement.kind == ItemKind::Toc;
            cursor.place(placement, page_count);
            if is_toc {
                toc_index = Some(cursor.items.len() - 1);
            }
        }
        let items = cursor.items;

        let pages_in = |region: Region| -> usize {
            items
                .iter()
                .filter(|i| i.region == region)
                .map(|i| i.page_count)
                .sum()
        };
        let parts = manifest
            .parts
            .iter()
            .enumerate()
            .map(|(index, part)| summarize_part(manifest, &items, index, &part.title))
            .collect();
        let result = AnalysisResult {
            front_matter_pages: pages_in(Region::Front),
            body_pages: pages_in(Region::Body),
            back_matter_pages: pages_in(Region::Back),
            total_pages: items.last().map(|i| i.end_page).unwrap_or(0),
            toc_index,
            parts,
            items,
        };
        tracing::debug!(
            total_pages = result.total_pages,
            items = result.items.len(),
            toc_pages = toc.pages,
            "analysis complete"
        );
        Ok(result)
    }
}

/// Convenience wrapper around a fresh `Analyzer`.
pub fn analyze(manifest: &Manifest, toc: &TocReservation) -> Result<AnalysisResult> {
    Analyzer::new().analyze(manifest, toc)
}

fn plan_placements<'a>(manifest: &'a Manifest, toc: &TocReservation) -> Vec<Placement<'a>> {
    let mut out = Vec::new();
    let mut toc_title = None;
    for item in &manifest.front_matter {
        if item.is_toc_placeholder() {
            toc_title = Some(
                item.title
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| "Contents".to_string()),
            );
            continue;
        }
        out.push(Placement {
            kind: ItemKind::FrontMatter,
            title: item.display_title(),
            pdf: Some(crate::manifest::expand_home(&item.pdf)),
            pages: None,
            recto: false,
            part: None,
            work_id: None,
        });
    }
    if let Some(title) = toc_title {
        out.push(Placement {
            kind: ItemKind::Toc,
            title,
            pdf: toc.pdf.clone(),
            pages: Some(toc.pages),
            recto: true,
            part: None,
            work_id: None,
        });
    }

    let work_placement = |work: &crate::manifest::WorkEntry, part: Option<(usize, &'a str)>| {
        Placement {
            kind: ItemKind::Work,
            title: work.title.clone(),
            pdf: Some(crate::manifest::expand_home(&work.pdf)),
            pages: None,
            recto: manifest.works_start_recto,
            part,
            work_id: Some(work.id.clone()).filter(|id| !id.is_empty()),
        }
    };
    if manifest.has_parts() {
        for (index, part) in manifest.parts.iter().enumerate() {
            let owner = Some((index, part.title.as_str()));
            if part.has_divider() {
                out.push(Placement {
                    kind: ItemKind::PartDivider,
                    title: part.title.clone(),
                    pdf: Some(crate::manifest::expand_home(&part.pdf)),
                    pages: None,
                    recto: true,
                    part: owner,
                    work_id: None,
                });
            }
            for work in &part.works {
                out.push(work_placement(work, owner));
            }
        }
    } else {
        for work in &manifest.works {
            out.push(work_placement(work, None));
        }
    }

    for item in &manifest.back_matter {
        out.push(Placement {
            kind: ItemKind::BackMatter,
            title: item.display_title(),
            pdf: Some(crate::manifest::expand_home(&item.pdf)),
            pages: None,
            recto: false,
            part: None,
            work_id: None,
        });
    }
    out
}

fn summarize_part(
    manifest: &Manifest,
    items: &[ContentItem],
    index: usize,
    title: &str,
) -> PartAnalysis {
    let first = items.iter().position(|i| i.part_index == Some(index));
    let range = match first {
        Some(start) => {
            let len = items[start..]
                .iter()
                .take_while(|i| i.part_index == Some(index))
                .count();
            start..start + len
        }
        None => {
            // A part without pages sits where the next part would begin.
            let at = items
                .iter()
                .position(|i| i.part_index.is_some_and(|p| p > index) || i.region == Region::Back)
                .unwrap_or(items.len());
            at..at
        }
    };
    let slice = &items[range.clone()];
    let start_page = match slice.first() {
        Some(item) => item.start_page,
        None => items
            .get(range.start)
            .map(|i| i.start_page)
            .unwrap_or_else(|| items.last().map(|i| i.end_page + 1).unwrap_or(1)),
    };
    PartAnalysis {
        index,
        key: manifest.part_key(index),
        title: title.to_string(),
        start_page,
        end_page: slice.last().map(|i| i.end_page).unwrap_or(start_page - 1),
        work_count: slice.iter().filter(|i| i.kind == ItemKind::Work).count(),
        items: range,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::manifest::{
        BackMatterItem, FrontMatterItem, HeaderContent, PageNumberPosition, PartEntry,
        SuppressPageNumbers, Typography, WorkEntry,
    };
    use crate::font::FontSet;
    use crate::mapping::PageMapping;
    use crate::numbering::PageNumberTracker;
    use crate::overlay::OverlayEngine;
    use crate::test_pdf::write_test_pdf;
    use crate::toc::generate_toc_entries;
    use crate::types::Margins;
    use proptest::prelude::*;
    use std::collections::HashMap;

    pub(crate) fn empty_manifest(dir: &Path) -> Manifest {
        Manifest {
            title: "Collected Essays".to_string(),
            author: "A. Writer".to_string(),
            output_path: dir.join("book.pdf"),
            template_path: None,
            typography: Typography::default(),
            page_number_position: PageNumberPosition::Centered,
            suppress_page_numbers: SuppressPageNumbers::Both,
            works_start_recto: true,
            verso_header: HeaderContent::BookTitle,
            recto_header: HeaderContent::EssayTitle,
            front_matter: Vec::new(),
            parts: Vec::new(),
            works: Vec::new(),
            back_matter: Vec::new(),
        }
    }

    pub(crate) fn front(dir: &Path, name: &str, pages: usize) -> FrontMatterItem {
        let pdf = dir.join(format!("{name}.pdf"));
        write_test_pdf(&pdf, pages, &name.to_ascii_uppercase());
        FrontMatterItem {
            kind: name.to_string(),
            pdf,
            placeholder: false,
            title: None,
        }
    }

    pub(crate) fn toc_placeholder() -> FrontMatterItem {
        FrontMatterItem {
            kind: "toc".to_string(),
            pdf: PathBuf::new(),
            placeholder: true,
            title: None,
        }
    }

    pub(crate) fn work(dir: &Path, id: &str, pages: usize) -> WorkEntry {
        let pdf = dir.join(format!("{id}.pdf"));
        write_test_pdf(&pdf, pages, &id.to_ascii_uppercase());
        WorkEntry {
            id: id.to_string(),
            title: format!("Essay {id}"),
            pdf,
        }
    }

    pub(crate) fn part(dir: &Path, id: &str, divider_pages: usize, works: Vec<WorkEntry>) -> PartEntry {
        let pdf = if divider_pages > 0 {
            let pdf = dir.join(format!("{id}-divider.pdf"));
            write_test_pdf(&pdf, divider_pages, &format!("{}-DIV", id.to_ascii_uppercase()));
            pdf
        } else {
            PathBuf::new()
        };
        PartEntry {
            id: id.to_string(),
            title: format!("Part {id}"),
            pdf,
            works,
            no_divider: divider_pages == 0,
        }
    }

    pub(crate) fn back(dir: &Path, name: &str, pages: usize) -> BackMatterItem {
        let pdf = dir.join(format!("{name}.pdf"));
        write_test_pdf(&pdf, pages, &name.to_ascii_uppercase());
        BackMatterItem {
            kind: name.to_string(),
            pdf,
            title: None,
        }
    }

    /// Two one-page front matter items, a TOC placeholder and works of
    /// 2, 3 and 2 pages.
    pub(crate) fn flat_scenario(dir: &Path) -> Manifest {
        let mut manifest = empty_manifest(dir);
        manifest.front_matter = vec![
            front(dir, "title", 1),
            front(dir, "copyright", 1),
            toc_placeholder(),
        ];
        manifest.works = vec![work(dir, "w1", 2), work(dir, "w2", 3), work(dir, "w3", 2)];
        manifest
    }

    pub(crate) fn assert_adjacent(result: &AnalysisResult) {
        for pair in result.items.windows(2) {
            assert_eq!(pair[0].end_page + 1, pair[1].start_page, "{:?}", pair);
        }
        assert_eq!(result.items.first().map(|i| i.start_page), Some(1));
    }

    /// Page counts of a generated book.
    #[derive(Debug, Clone)]
    pub(crate) struct BookShape {
        pub front: Vec<usize>,
        pub toc: bool,
        /// Divider pages (0 for none) and work page counts per part.
        pub parts: Vec<(usize, Vec<usize>)>,
        pub flat: bool,
        pub back: Vec<usize>,
        pub works_start_recto: bool,
    }

    pub(crate) fn book_shape() -> impl Strategy<Value = BookShape> {
        (
            prop::collection::vec(1..4usize, 0..3),
            any::<bool>(),
            prop::collection::vec((0..3usize, prop::collection::vec(1..5usize, 0..3)), 1..4),
            any::<bool>(),
            prop::collection::vec(1..3usize, 0..3),
            any::<bool>(),
        )
            .prop_map(|(front, toc, mut parts, flat, back, works_start_recto)| {
                for (divider, works) in &mut parts {
                    if *divider == 0 && works.is_empty() {
                        works.push(1);
                    }
                }
                if flat && parts.iter().all(|(_, works)| works.is_empty()) {
                    parts[0].1.push(1);
                }
                BookShape {
                    front,
                    toc,
                    parts,
                    flat,
                    back,
                    works_start_recto,
                }
            })
    }

    pub(crate) fn write_book(dir: &Path, shape: &BookShape) -> Manifest {
        let mut manifest = empty_manifest(dir);
        manifest.works_start_recto = shape.works_start_recto;
        for (idx, pages) in shape.front.iter().enumerate() {
            manifest.front_matter.push(front(dir, &format!("front{idx}"), *pages));
        }
        if shape.toc {
            manifest.front_matter.push(toc_placeholder());
        }
        for (p_idx, (divider, works)) in shape.parts.iter().enumerate() {
            let works: Vec<WorkEntry> = works
                .iter()
                .enumerate()
                .map(|(w_idx, pages)| work(dir, &format!("w{p_idx}x{w_idx}"), *pages))
                .collect();
            if shape.flat {
                manifest.works.extend(works);
            } else {
                manifest.parts.push(part(dir, &format!("p{p_idx}"), *divider, works));
            }
        }
        for (idx, pages) in shape.back.iter().enumerate() {
            manifest.back_matter.push(back(dir, &format!("back{idx}"), *pages));
        }
        manifest
    }

    /// Adjacency, recto starts, parity blanks, page totals and per-region
    /// counters stepping by one on every page.
    pub(crate) fn assert_pagination_invariants(manifest: &Manifest, result: &AnalysisResult) {
        assert_adjacent(result);
        for (idx, item) in result.items.iter().enumerate() {
            let forced = match item.kind {
                ItemKind::PartDivider | ItemKind::Toc => true,
                ItemKind::Work => manifest.works_start_recto,
                _ => false,
            };
            if forced {
                assert_eq!(item.start_page % 2, 1, "{} starts verso", item.title);
            }
            if item.kind == ItemKind::Blank {
                assert_eq!(item.page_count, 1);
                assert_eq!(item.start_page % 2, 0, "blank on a recto page");
                let next = result.items.get(idx + 1).expect("blank is followed by an item");
                assert!(
                    matches!(next.kind, ItemKind::PartDivider | ItemKind::Toc | ItemKind::Work),
                    "blank before {:?}",
                    next.kind
                );
            }
        }
        let total: usize = result.items.iter().map(|i| i.page_count).sum();
        assert_eq!(result.total_pages, total);
        assert_eq!(
            result.front_matter_pages + result.body_pages + result.back_matter_pages,
            total
        );

        let mut mapping = PageMapping::default();
        for (idx, item) in result.items.iter().enumerate() {
            mapping.push_item(idx, item);
        }
        let fonts = FontSet::ensure(&manifest.typography).expect("fonts");
        let layout = manifest.layout();
        let summary = OverlayEngine::new(&layout, &fonts, Margins::default())
            .plan(&mapping, &mut PageNumberTracker::new());
        assert_eq!(summary.stamps.len(), total);
        let mut counters: HashMap<Region, usize> = HashMap::new();
        for stamp in &summary.stamps {
            let counter = counters.entry(stamp.region).or_default();
            *counter += 1;
            assert_eq!(stamp.number_value, *counter, "page {}", stamp.physical_page);
        }
        for entry in generate_toc_entries(result) {
            let stamp = summary.by_physical_page(entry.physical_page).expect("stamp");
            assert_eq!(stamp.number_value, entry.page_number, "{}", entry.title);
        }
    }

    pub(crate) fn assert_recto_starts(result: &AnalysisResult) {
        for item in &result.items {
            if matches!(item.kind, ItemKind::PartDivider | ItemKind::Work | ItemKind::Toc) {
                assert_eq!(item.start_page % 2, 1, "{} starts verso", item.title);
            }
        }
    }

    #[test]
    fn flat_scenario_inserts_exactly_the_parity_blanks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = flat_scenario(dir.path());
        let result = analyze(&manifest, &TocReservation::default()).expect("analyze");

        let layout: Vec<(ItemKind, usize, usize)> = result
            .items
            .iter()
            .map(|i| (i.kind, i.start_page, i.end_page))
            .collect();
        assert_eq!(
            layout,
            vec![
                (ItemKind::FrontMatter, 1, 1),
                (ItemKind::FrontMatter, 2, 2),
                (ItemKind::Toc, 3, 4),
                (ItemKind::Work, 5, 6),
                (ItemKind::Work, 7, 9),
                (ItemKind::Blank, 10, 10),
                (ItemKind::Work, 11, 12),
            ]
        );
        let real: usize = result
            .items
            .iter()
            .filter(|i| !i.is_blank())
            .map(|i| i.page_count)
            .sum();
        let blanks = result.items.iter().filter(|i| i.is_blank()).count();
        assert_eq!(result.total_pages, real + blanks);
        assert_eq!(result.total_pages, 12);
        assert_eq!(result.front_matter_pages, 4);
        assert_eq!(result.body_pages, 8);
        assert_eq!(result.back_matter_pages, 0);
        assert_eq!(result.toc_index, Some(2));
        assert_eq!(result.work_count(), 3);
        assert_adjacent(&result);
        assert_recto_starts(&result);
    }

    #[test]
    fn toc_is_pushed_to_recto_after_odd_front_matter() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manifest = empty_manifest(dir.path());
        manifest.front_matter = vec![toc_placeholder(), front(dir.path(), "title", 1)];
        manifest.works = vec![work(dir.path(), "w1", 1)];
        let result = analyze(&manifest, &TocReservation::estimate(1)).expect("analyze");
        let kinds: Vec<ItemKind> = result.items.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ItemKind::FrontMatter,
                ItemKind::Blank,
                ItemKind::Toc,
                ItemKind::Blank,
                ItemKind::Work
            ]
        );
        assert_eq!(result.items[1].region, Region::Front);
        assert_eq!(result.items[3].region, Region::Front);
        assert_eq!(result.toc().map(|t| t.title.as_str()), Some("Contents"));
        assert_recto_starts(&result);
    }

    #[test]
    fn works_may_start_verso_when_allowed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manifest = empty_manifest(dir.path());
        manifest.works_start_recto = false;
        manifest.works = vec![work(dir.path(), "w1", 1), work(dir.path(), "w2", 1)];
        let result = analyze(&manifest, &TocReservation::default()).expect("analyze");
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.items[1].start_page, 2);
        assert!(result.toc_index.is_none());
    }

    #[test]
    fn parts_get_self_contained_ranges() {
        let dir = tempfile::tempdir().expect("tempdir");
        let d = dir.path();
        let mut manifest = empty_manifest(d);
        manifest.front_matter = vec![front(d, "title", 1)];
        manifest.parts = vec![
            part(d, "one", 1, vec![work(d, "a", 3)]),
            part(d, "two", 0, vec![work(d, "b", 2), work(d, "c", 1)]),
        ];
        manifest.back_matter = vec![back(d, "notes", 2)];
        let result = analyze(&manifest, &TocReservation::default()).expect("analyze");

        assert_adjacent(&result);
        assert_recto_starts(&result);
        let one = &result.parts[0];
        let two = &result.parts[1];
        assert_eq!((one.start_page, one.end_page), (3, 8));
        assert_eq!(one.work_count, 1);
        // Trailing blank before part two belongs to part one.
        assert!(result.items[one.items.end - 1].is_blank());
        assert_eq!(result.items[one.items.end - 1].part_title.as_deref(), Some("Part one"));
        assert_eq!((two.start_page, two.end_page), (9, 11));
        assert_eq!(two.work_count, 2);
        assert_eq!(one.items.end, two.items.start);
        assert_eq!(result.region_range(Region::Back), two.items.end..result.items.len());
        assert_eq!(result.back_matter_pages, 2);
        assert_eq!(result.items.last().map(|i| i.start_page), Some(12));
        assert_eq!(result.total_pages, 13);
    }

    #[test]
    fn unreadable_pdf_aborts_analysis() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manifest = flat_scenario(dir.path());
        std::fs::write(&manifest.works[1].pdf, b"garbage").expect("write");
        let err = analyze(&manifest, &TocReservation::default()).expect_err("read");
        assert!(err.to_string().contains("w2.pdf"));
        manifest.works.truncate(1);
        assert!(analyze(&manifest, &TocReservation::default()).is_ok());
    }

    #[test]
    fn region_range_of_missing_region_is_empty_at_boundary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = flat_scenario(dir.path());
        let result = analyze(&manifest, &TocReservation::default()).expect("analyze");
        assert_eq!(result.region_range(Region::Front), 0..3);
        assert_eq!(result.region_range(Region::Body), 3..7);
        assert_eq!(result.region_range(Region::Back), 7..7);
        assert_eq!(result.item_at_page(10).map(|(idx, _)| idx), Some(5));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_analysis_keeps_pagination_invariants(
            shape in book_shape(),
            toc_pages in 1..4usize
        ) {
            let dir = tempfile::tempdir().expect("tempdir");
            let manifest = write_book(dir.path(), &shape);
            manifest.validate().expect("generated manifest is valid");
            let result = analyze(&manifest, &TocReservation::estimate(toc_pages)).expect("analyze");
            assert_pagination_invariants(&manifest, &result);
            prop_assert_eq!(result.toc().map(|t| t.page_count), shape.toc.then_some(toc_pages));
            if !shape.flat {
                prop_assert_eq!(result.parts.len(), shape.parts.len());
                for pair in result.parts.windows(2) {
                    prop_assert_eq!(pair[0].end_page + 1, pair[1].start_page);
                }
            }
        }
    }
}
