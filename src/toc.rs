use crate::analyzer::{AnalysisResult, Analyzer, ItemKind, TocReservation};
use crate::debug::BuildLog;
use crate::error::{RectoError, Result};
use crate::font::{FontRole, FontSet, pdf_literal};
use crate::manifest::{Manifest, Typography};
use crate::merge::{PageContent, save_page_document};
use crate::numbering::{PageNumberTracker, Region};
use crate::pdfinfo;
use crate::types::{PageBox, fmt_num};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Render attempts before a table of contents that keeps changing size is
/// reported as an error.
pub const MAX_TOC_PASSES: usize = 3;

pub const TOC_FILE_NAME: &str = "toc.pdf";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TocEntry {
    pub title: String,
    /// Counter value in the entry's numbering region.
    pub page_number: usize,
    /// `page_number` formatted in the region's style.
    pub label: String,
    pub is_part: bool,
    pub is_back_matter: bool,
    pub item_index: usize,
    pub physical_page: usize,
    pub indent: u8,
}

/// Derives entries from an analysis. Counters advance over every item,
/// blanks included, exactly as the overlay engine advances them.
pub fn generate_toc_entries(analysis: &AnalysisResult) -> Vec<TocEntry> {
    let mut tracker = PageNumberTracker::new();
    let mut entries = Vec::new();
    for (item_index, item) in analysis.items.iter().enumerate() {
        let first = tracker.advance_by(item.region, item.page_count);
        let (is_part, is_back_matter) = match item.kind {
            ItemKind::PartDivider => (true, false),
            ItemKind::Work => (false, false),
            ItemKind::BackMatter => (false, true),
            ItemKind::FrontMatter | ItemKind::Toc | ItemKind::Blank => continue,
        };
        let indent = u8::from(item.kind == ItemKind::Work && item.part_index.is_some());
        entries.push(TocEntry {
            title: item.title.clone(),
            page_number: first,
            label: item.region.style().format(first),
            is_part,
            is_back_matter,
            item_index,
            physical_page: item.start_page,
            indent,
        });
    }
    entries
}

pub struct TocRenderContext<'a> {
    pub book_title: &'a str,
    pub toc_title: &'a str,
    pub page_box: PageBox,
    pub typography: &'a Typography,
    pub fonts: &'a FontSet,
    pub pass: usize,
}

/// Produces the table of contents PDF for a set of entries. The page count
/// of the written file is what the build measures.
pub trait TocRenderer: Send + Sync {
    fn render(&self, entries: &[TocEntry], ctx: &TocRenderContext<'_>, out: &Path) -> Result<()>;
}

/// Typesets the contents directly with lopdf: a heading, then one line per
/// entry with the title on the left and the folio flush right.
#[derive(Debug, Clone)]
pub struct BuiltinTocRenderer {
    pub margin: f32,
    pub indent_step: f32,
    pub leading: f32,
}

impl Default for BuiltinTocRenderer {
    fn default() -> Self {
        Self {
            margin: 72.0,
            indent_step: 18.0,
            leading: 1.5,
        }
    }
}

struct TocPageWriter {
    pages: Vec<String>,
    current: String,
    y: f32,
    top: f32,
    bottom: f32,
}

impl TocPageWriter {
    fn ensure_room(&mut self, height: f32) {
        if self.y - height < self.bottom && !self.current.is_empty() {
            self.pages.push(std::mem::take(&mut self.current));
            self.y = self.top;
        }
    }

    fn text(&mut self, font: &str, size: f32, x: f32, text: &str) {
        self.current.push_str(&format!(
            "BT /{} {} Tf {} {} Td {} Tj ET\n",
            font,
            fmt_num(size),
            fmt_num(x),
            fmt_num(self.y),
            pdf_literal(text)
        ));
    }

    fn finish(mut self) -> Vec<String> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.pages.push(self.current);
        }
        self.pages
    }
}

fn wrap_words(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{line} {word}")
        };
        if !line.is_empty() && measure(&candidate) > max_width {
            lines.push(std::mem::replace(&mut line, word.to_string()));
        } else {
            line = candidate;
        }
    }
    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}

impl TocRenderer for BuiltinTocRenderer {
    fn render(&self, entries: &[TocEntry], ctx: &TocRenderContext<'_>, out: &Path) -> Result<()> {
        let page = ctx.page_box;
        let left = page.llx + self.margin;
        let right = page.urx - self.margin;
        let heading_size = ctx.typography.header_size * 2.0;
        let size = ctx.typography.page_number_size + 1.0;
        let line_height = size * self.leading;
        let top = page.ury - self.margin;

        let mut writer = TocPageWriter {
            pages: Vec::new(),
            current: String::new(),
            y: top - heading_size,
            top,
            bottom: page.lly + self.margin,
        };
        let heading_width = ctx.fonts.measure(FontRole::Header, heading_size, ctx.toc_title);
        let heading_x = page.llx + (page.width() - heading_width) / 2.0;
        writer.text("TocHd", heading_size, heading_x, ctx.toc_title);
        writer.y -= heading_size * 2.0;

        let mut seen_back_matter = false;
        for entry in entries {
            let (font, role) = if entry.is_part {
                ("TocHd", FontRole::Header)
            } else {
                ("TocTx", FontRole::PageNumber)
            };
            let gap_before = entry.is_part || (entry.is_back_matter && !seen_back_matter);
            seen_back_matter |= entry.is_back_matter;

            let x = left + self.indent_step * entry.indent as f32;
            let number_width = ctx.fonts.measure(FontRole::PageNumber, size, &entry.label);
            let available = (right - x - number_width - self.indent_step).max(size * 4.0);
            let lines = wrap_words(&entry.title, available, |text| {
                ctx.fonts.measure(role, size, text)
            });

            let block = line_height * (lines.len() as f32 + if gap_before { 1.0 } else { 0.0 });
            writer.ensure_room(block);
            if gap_before && writer.y < writer.top {
                writer.y -= line_height;
            }
            let last = lines.len().saturating_sub(1);
            for (idx, line) in lines.iter().enumerate() {
                let line_x = if idx == 0 { x } else { x + self.indent_step };
                writer.text(font, size, line_x, line);
                if idx == last {
                    writer.text("TocTx", size, right - number_width, &entry.label);
                }
                writer.y -= line_height;
            }
        }

        let contents: Vec<PageContent> = writer
            .finish()
            .into_iter()
            .map(|ops| PageContent {
                page_box: page,
                ops: ops.into_bytes(),
            })
            .collect();
        let fonts = [
            ("TocHd", ctx.fonts.font(FontRole::Header)),
            ("TocTx", ctx.fonts.font(FontRole::PageNumber)),
        ];
        save_page_document(out, &contents, &fonts, Some(ctx.book_title))
    }
}

#[derive(Debug, Clone)]
pub struct TocResolution {
    pub analysis: AnalysisResult,
    pub entries: Vec<TocEntry>,
    /// Number of renders performed; zero when the book has no TOC.
    pub passes: usize,
}

pub struct TocInputs<'a> {
    pub renderer: &'a dyn TocRenderer,
    pub fonts: &'a FontSet,
    pub build_dir: &'a Path,
    pub estimate: usize,
    pub log: Option<&'a BuildLog>,
}

/// Analyzes `manifest`, rendering and re-measuring the table of contents
/// until its reserved page count matches its rendered page count.
pub fn resolve_toc(
    analyzer: &mut Analyzer,
    manifest: &Manifest,
    inputs: &TocInputs<'_>,
) -> Result<TocResolution> {
    let mut reserved = inputs.estimate.max(1);
    let mut analysis = analyzer.analyze(manifest, &TocReservation::estimate(reserved))?;
    let Some(toc_index) = analysis.toc_index else {
        let entries = generate_toc_entries(&analysis);
        return Ok(TocResolution {
            analysis,
            entries,
            passes: 0,
        });
    };
    let toc_title = analysis.items[toc_index].title.clone();
    let page_box = toc_page_box(&analysis, toc_index);
    let out: PathBuf = inputs.build_dir.join(TOC_FILE_NAME);

    for pass in 1..=MAX_TOC_PASSES {
        let entries = generate_toc_entries(&analysis);
        let ctx = TocRenderContext {
            book_title: &manifest.title,
            toc_title: &toc_title,
            page_box,
            typography: &manifest.typography,
            fonts: inputs.fonts,
            pass,
        };
        inputs
            .renderer
            .render(&entries, &ctx, &out)
            .map_err(|err| RectoError::Render(format!("table of contents pass {pass}: {err}")))?;
        let actual = pdfinfo::page_count(&out)?;
        tracing::info!(pass, reserved, actual, entries = entries.len(), "toc pass");
        if let Some(log) = inputs.log {
            log.log_json(&serde_json::json!({
                "type": "toc.pass",
                "pass": pass,
                "reserved_pages": reserved,
                "rendered_pages": actual,
                "entries": entries.len(),
            }));
        }
        if actual == reserved {
            let analysis =
                analyzer.analyze(manifest, &TocReservation::rendered(actual, out.clone()))?;
            return Ok(TocResolution {
                analysis,
                entries,
                passes: pass,
            });
        }
        reserved = actual;
        analysis = analyzer.analyze(manifest, &TocReservation::estimate(reserved))?;
    }
    Err(RectoError::Render(format!(
        "table of contents did not settle after {MAX_TOC_PASSES} passes (last size {reserved} pages)"
    )))
}

// Page size of the closest real front-matter page before the TOC.
fn toc_page_box(analysis: &AnalysisResult, toc_index: usize) -> PageBox {
    analysis.items[..toc_index]
        .iter()
        .rev()
        .filter(|item| item.region == Region::Front)
        .find_map(|item| item.pdf.as_deref())
        .and_then(|path| pdfinfo::inspect_pdf(path).ok())
        .map(|info| info.last_page_box)
        .unwrap_or(PageBox::LETTER)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::analyzer::tests::{
        assert_pagination_invariants, book_shape, empty_manifest, flat_scenario, front, part,
        toc_placeholder, work, write_book,
    };
    use crate::test_pdf::{page_texts, write_test_pdf};
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Writes a fixed number of pages regardless of entries.
    pub(crate) struct FixedPagesRenderer {
        pub pages: Vec<usize>,
        pub calls: Mutex<usize>,
    }

    impl FixedPagesRenderer {
        pub(crate) fn new(pages: Vec<usize>) -> Self {
            Self {
                pages,
                calls: Mutex::new(0),
            }
        }
    }

    impl TocRenderer for FixedPagesRenderer {
        fn render(&self, _entries: &[TocEntry], ctx: &TocRenderContext<'_>, out: &Path) -> Result<()> {
            let mut calls = self.calls.lock().expect("calls");
            let idx = (*calls).min(self.pages.len() - 1);
            *calls += 1;
            assert_eq!(ctx.pass, *calls);
            write_test_pdf(out, self.pages[idx], "TOC");
            Ok(())
        }
    }

    fn fonts() -> FontSet {
        FontSet::ensure(&Typography::default()).expect("fonts")
    }

    #[test]
    fn entries_follow_body_and_back_counters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let d = dir.path();
        let mut manifest = empty_manifest(d);
        manifest.front_matter = vec![front(d, "title", 1), toc_placeholder()];
        manifest.parts = vec![
            part(d, "one", 1, vec![work(d, "a", 3)]),
            part(d, "two", 1, vec![work(d, "b", 2)]),
        ];
        manifest.back_matter = vec![crate::analyzer::tests::back(d, "notes", 2)];
        let analysis = analyze(&manifest, &TocReservation::default()).expect("analyze");
        let entries = generate_toc_entries(&analysis);

        let summary: Vec<(&str, &str, bool, bool, u8)> = entries
            .iter()
            .map(|e| (e.title.as_str(), e.label.as_str(), e.is_part, e.is_back_matter, e.indent))
            .collect();
        // Body: divider 1, blank 2, a 3-5, blank 6, divider 7, blank 8, b 9-10.
        assert_eq!(
            summary,
            vec![
                ("Part one", "1", true, false, 0),
                ("Essay a", "3", false, false, 1),
                ("Part two", "7", true, false, 0),
                ("Essay b", "9", false, false, 1),
                ("Notes", "1", false, true, 0),
            ]
        );
        for entry in &entries {
            assert_eq!(analysis.items[entry.item_index].start_page, entry.physical_page);
        }
    }

    #[test]
    fn front_matter_toc_and_blanks_are_not_listed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = flat_scenario(dir.path());
        let analysis = analyze(&manifest, &TocReservation::default()).expect("analyze");
        let entries = generate_toc_entries(&analysis);
        let labels: Vec<&str> = entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["1", "3", "7"]);
    }

    #[test]
    fn matching_estimate_settles_in_one_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = flat_scenario(dir.path());
        let renderer = FixedPagesRenderer::new(vec![2]);
        let fonts = fonts();
        let inputs = TocInputs {
            renderer: &renderer,
            fonts: &fonts,
            build_dir: dir.path(),
            estimate: 2,
            log: None,
        };
        let resolved = resolve_toc(&mut Analyzer::new(), &manifest, &inputs).expect("resolve");
        assert_eq!(resolved.passes, 1);
        let toc = resolved.analysis.toc().expect("toc item");
        assert_eq!(toc.pdf.as_deref(), Some(dir.path().join(TOC_FILE_NAME).as_path()));
        assert_eq!(toc.page_count, 2);
    }

    #[test]
    fn larger_toc_shifts_later_items_by_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manifest = flat_scenario(dir.path());
        // Verso starts allowed so a one page growth is not absorbed by parity blanks.
        manifest.works_start_recto = false;
        let before = analyze(&manifest, &TocReservation::estimate(2)).expect("before");

        let renderer = FixedPagesRenderer::new(vec![3]);
        let fonts = fonts();
        let inputs = TocInputs {
            renderer: &renderer,
            fonts: &fonts,
            build_dir: dir.path(),
            estimate: 2,
            log: None,
        };
        let resolved = resolve_toc(&mut Analyzer::new(), &manifest, &inputs).expect("resolve");
        assert_eq!(resolved.passes, 2);
        let after = &resolved.analysis;
        let toc_index = after.toc_index.expect("toc");
        assert_eq!(after.items[toc_index].page_count, 3);
        assert_eq!(before.items.len(), after.items.len());
        for (old, new) in before.items[toc_index + 1..]
            .iter()
            .zip(&after.items[toc_index + 1..])
        {
            assert_eq!(new.start_page, old.start_page + 1, "{}", new.title);
            assert_eq!(new.end_page, old.end_page + 1, "{}", new.title);
        }
        assert_eq!(after.total_pages, before.total_pages + 1);
        assert_eq!(resolved.entries, generate_toc_entries(after));
    }

    #[test]
    fn recto_starts_hold_after_reanalysis() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = flat_scenario(dir.path());
        let renderer = FixedPagesRenderer::new(vec![3]);
        let fonts = fonts();
        let inputs = TocInputs {
            renderer: &renderer,
            fonts: &fonts,
            build_dir: dir.path(),
            estimate: 2,
            log: None,
        };
        let resolved = resolve_toc(&mut Analyzer::new(), &manifest, &inputs).expect("resolve");
        crate::analyzer::tests::assert_recto_starts(&resolved.analysis);
        crate::analyzer::tests::assert_adjacent(&resolved.analysis);
    }

    #[test]
    fn oscillating_toc_is_a_render_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = flat_scenario(dir.path());
        let renderer = FixedPagesRenderer::new(vec![3, 4, 5]);
        let fonts = fonts();
        let inputs = TocInputs {
            renderer: &renderer,
            fonts: &fonts,
            build_dir: dir.path(),
            estimate: 2,
            log: None,
        };
        let err = resolve_toc(&mut Analyzer::new(), &manifest, &inputs).expect_err("unsettled");
        assert!(matches!(err, RectoError::Render(_)));
        assert_eq!(*renderer.calls.lock().expect("calls"), MAX_TOC_PASSES);
    }

    #[test]
    fn settles_on_third_pass_after_recheck() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = flat_scenario(dir.path());
        let renderer = FixedPagesRenderer::new(vec![3, 4, 4]);
        let fonts = fonts();
        let inputs = TocInputs {
            renderer: &renderer,
            fonts: &fonts,
            build_dir: dir.path(),
            estimate: 2,
            log: None,
        };
        let resolved = resolve_toc(&mut Analyzer::new(), &manifest, &inputs).expect("resolve");
        assert_eq!(resolved.passes, 3);
        assert_eq!(resolved.analysis.toc().map(|t| t.page_count), Some(4));
    }

    #[test]
    fn book_without_toc_skips_rendering() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manifest = flat_scenario(dir.path());
        manifest.front_matter.retain(|item| !item.placeholder);
        let renderer = FixedPagesRenderer::new(vec![1]);
        let fonts = fonts();
        let inputs = TocInputs {
            renderer: &renderer,
            fonts: &fonts,
            build_dir: dir.path(),
            estimate: 2,
            log: None,
        };
        let resolved = resolve_toc(&mut Analyzer::new(), &manifest, &inputs).expect("resolve");
        assert_eq!(resolved.passes, 0);
        assert_eq!(*renderer.calls.lock().expect("calls"), 0);
        assert_eq!(resolved.entries.len(), 3);
    }

    #[test]
    fn builtin_renderer_lists_titles_and_paginates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fonts = fonts();
        let typography = Typography::default();
        let entries: Vec<TocEntry> = (1..=60)
            .map(|n| TocEntry {
                title: format!("Essay number {n} (revised)"),
                page_number: n * 3,
                label: (n * 3).to_string(),
                is_part: n % 20 == 1,
                is_back_matter: false,
                item_index: n,
                physical_page: n * 3 + 6,
                indent: 0,
            })
            .collect();
        let ctx = TocRenderContext {
            book_title: "Collected Essays",
            toc_title: "Contents",
            page_box: PageBox::LETTER,
            typography: &typography,
            fonts: &fonts,
            pass: 1,
        };
        let out = dir.path().join("toc.pdf");
        BuiltinTocRenderer::default()
            .render(&entries, &ctx, &out)
            .expect("render");
        let texts = page_texts(&out);
        assert!(texts.len() >= 2, "60 entries should not fit one page");
        assert!(texts[0].contains("(Contents) Tj"));
        assert!(texts[0].contains("(Essay number 1 \\(revised\\)) Tj"));
        assert!(texts.iter().any(|t| t.contains("(180) Tj")));
        assert_eq!(pdfinfo::page_count(&out).expect("count"), texts.len());
    }

    #[test]
    fn builtin_renderer_wraps_long_titles() {
        let lines = wrap_words("one two three four", 10.0, |t| t.len() as f32);
        assert_eq!(lines, vec!["one two", "three four"]);
        let single = wrap_words("unbreakablelongword", 5.0, |t| t.len() as f32);
        assert_eq!(single, vec!["unbreakablelongword"]);
        assert_eq!(wrap_words("", 5.0, |t| t.len() as f32), vec![String::new()]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_reanalysis_keeps_pagination_invariants(
            shape in book_shape(),
            estimate in 1..4usize,
            rendered in 1..5usize
        ) {
            let dir = tempfile::tempdir().expect("tempdir");
            let manifest = write_book(dir.path(), &shape);
            let renderer = FixedPagesRenderer::new(vec![rendered]);
            let fonts = fonts();
            let inputs = TocInputs {
                renderer: &renderer,
                fonts: &fonts,
                build_dir: dir.path(),
                estimate,
                log: None,
            };
            let resolved = resolve_toc(&mut Analyzer::new(), &manifest, &inputs).expect("resolve");
            assert_pagination_invariants(&manifest, &resolved.analysis);
            prop_assert_eq!(&resolved.entries, &generate_toc_entries(&resolved.analysis));
            if shape.toc {
                prop_assert_eq!(resolved.analysis.toc().map(|t| t.page_count), Some(rendered));
                prop_assert_eq!(resolved.passes, if rendered == estimate { 1 } else { 2 });
                let direct = analyze(&manifest, &TocReservation::estimate(rendered)).expect("direct");
                let layout = |a: &AnalysisResult| -> Vec<(ItemKind, usize, usize)> {
                    a.items.iter().map(|i| (i.kind, i.start_page, i.page_count)).collect()
                };
                prop_assert_eq!(layout(&resolved.analysis), layout(&direct));
            } else {
                prop_assert_eq!(resolved.passes, 0);
            }
        }
    }
}
