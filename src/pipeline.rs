use crate::analyzer::{AnalysisResult, Analyzer, PartAnalysis};
use crate::cache::{PartCache, part_fingerprint, part_record, sanitize_key};
use crate::debug::{BuildLog, StageTimer};
use crate::error::{RectoError, Result};
use crate::font::FontSet;
use crate::manifest::{Manifest, PageLayout};
use crate::merge::{DocInfo, concat_pdfs, merge_analysis, merge_items};
use crate::numbering::{PageNumberTracker, Region};
use crate::overlay::{OverlayEngine, OverlaySummary};
use crate::toc::{TocEntry, TocInputs, TocRenderer, TocResolution, resolve_toc};
use crate::types::Margins;
use serde::Serialize;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `(stage, current, total, message)`, called synchronously on the building
/// thread.
pub type ProgressCallback = Arc<dyn Fn(&str, usize, usize, &str) + Send + Sync>;

const MERGED_FILE_NAME: &str = "merged.pdf";

/// Which parts an incremental build renders with overlays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartSelection {
    pub selected: Vec<usize>,
    pub rebuild_all: bool,
}

impl PartSelection {
    pub fn all() -> Self {
        Self {
            selected: Vec::new(),
            rebuild_all: true,
        }
    }

    pub fn only(selected: impl IntoIterator<Item = usize>) -> Self {
        Self {
            selected: selected.into_iter().collect(),
            rebuild_all: false,
        }
    }

    pub fn wants(&self, index: usize) -> bool {
        self.rebuild_all || self.selected.contains(&index)
    }

    /// Rejects indices that name no part of a book with `part_count` parts.
    pub fn check(&self, part_count: usize) -> Result<()> {
        match self.selected.iter().find(|&&idx| idx >= part_count) {
            Some(idx) => Err(RectoError::validation(
                "selection",
                format!("part {idx} is selected but the book has {part_count} parts"),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartState {
    /// Rendered with overlays and written to the cache.
    Rebuilt,
    /// Taken unmodified from the cache.
    CachedReuse,
    /// Rendered without overlays because no usable cache entry existed.
    UncachedFast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartOutcome {
    pub index: usize,
    pub key: String,
    pub title: String,
    pub state: PartState,
    pub path: PathBuf,
    pub start_page: usize,
    pub page_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub success: bool,
    pub output_path: PathBuf,
    pub total_pages: usize,
    pub work_count: usize,
    pub parts_built: usize,
    pub parts_cached: usize,
    pub parts_placeholder: usize,
    pub warnings: Vec<String>,
    pub parts: Vec<PartOutcome>,
    pub toc_passes: usize,
    pub toc_entries: Vec<TocEntry>,
    pub stamps: OverlaySummary,
}

/// Everything one build invocation needs, borrowed from the `Binder`.
pub(crate) struct BuildContext<'a> {
    pub manifest: &'a Manifest,
    pub build_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub collection_id: String,
    pub toc_estimate: usize,
    pub toc_renderer: &'a dyn TocRenderer,
    pub progress: Option<&'a ProgressCallback>,
    pub log: Option<&'a BuildLog>,
    pub margins: Margins,
}

impl BuildContext<'_> {
    fn report(&self, stage: &str, current: usize, total: usize, message: &str) {
        tracing::debug!(stage, current, total, message, "progress");
        if let Some(progress) = self.progress {
            progress(stage, current, total, message);
        }
    }

    fn doc_info(&self) -> DocInfo {
        DocInfo {
            title: self.manifest.title.clone(),
            author: self.manifest.author.clone(),
        }
    }

    fn prepare(&self) -> Result<(FontSet, TocResolution)> {
        {
            let _t = StageTimer::start(self.log, "validate");
            self.report("validate", 0, 1, "validating manifest");
            self.manifest.validate()?;
        }
        std::fs::create_dir_all(&self.build_dir)?;
        let fonts = {
            let _t = StageTimer::start(self.log, "fonts");
            self.report("fonts", 0, 1, "resolving fonts");
            FontSet::ensure(&self.manifest.typography)?
        };
        let resolution = {
            let _t = StageTimer::start(self.log, "toc");
            self.report("analyze", 0, 1, "assigning page ranges");
            let inputs = TocInputs {
                renderer: self.toc_renderer,
                fonts: &fonts,
                build_dir: &self.build_dir,
                estimate: self.toc_estimate,
                log: self.log,
            };
            let resolution = resolve_toc(&mut Analyzer::new(), self.manifest, &inputs)?;
            self.report(
                "toc",
                resolution.passes,
                resolution.passes,
                &format!("{} entries", resolution.entries.len()),
            );
            resolution
        };
        tracing::info!(
            total_pages = resolution.analysis.total_pages,
            works = resolution.analysis.work_count(),
            toc_passes = resolution.passes,
            "book analyzed"
        );
        Ok((fonts, resolution))
    }

    fn finish(&self, result: &BuildResult) {
        self.report("done", 1, 1, &result.output_path.display().to_string());
        if let Some(log) = self.log {
            log.increment("parts.built", result.parts_built as u64);
            log.increment("parts.cached", result.parts_cached as u64);
            log.increment("parts.placeholder", result.parts_placeholder as u64);
            log.increment("warnings", result.warnings.len() as u64);
            log.emit_summary(&self.manifest.title);
            log.flush();
        }
        for warning in &result.warnings {
            tracing::warn!("{warning}");
        }
    }
}

fn publish(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(from, to)?;
    Ok(())
}

/// Whole-book build: one merge, one overlay pass.
pub(crate) fn build(ctx: &BuildContext<'_>) -> Result<BuildResult> {
    let (fonts, resolution) = ctx.prepare()?;
    let analysis = &resolution.analysis;
    let layout = ctx.manifest.layout();
    let merged = ctx.build_dir.join(MERGED_FILE_NAME);

    let mapping = {
        let _t = StageTimer::start(ctx.log, "merge");
        ctx.report("merge", 0, analysis.items.len(), "merging sources");
        merge_analysis(analysis, &ctx.build_dir, &merged, &ctx.doc_info())?
    };
    let stamps = {
        let _t = StageTimer::start(ctx.log, "overlay");
        ctx.report("overlay", 0, mapping.len(), "stamping page numbers and headers");
        let engine = OverlayEngine::new(&layout, &fonts, ctx.margins);
        engine.apply(&merged, &mapping, &mut PageNumberTracker::new(), ctx.log)?
    };
    let output_path = ctx.manifest.output_path();
    publish(&merged, &output_path)?;

    let result = BuildResult {
        success: true,
        output_path,
        total_pages: analysis.total_pages,
        work_count: analysis.work_count(),
        parts_built: 0,
        parts_cached: 0,
        parts_placeholder: 0,
        warnings: Vec::new(),
        parts: Vec::new(),
        toc_passes: resolution.passes,
        toc_entries: resolution.entries.clone(),
        stamps,
    };
    ctx.finish(&result);
    Ok(result)
}

fn advance_over(tracker: &mut PageNumberTracker, analysis: &AnalysisResult, range: Range<usize>) {
    for item in &analysis.items[range] {
        tracker.advance_by(item.region, item.page_count);
    }
}

struct SectionRenderer<'a> {
    ctx: &'a BuildContext<'a>,
    analysis: &'a AnalysisResult,
    layout: &'a PageLayout,
    engine: OverlayEngine<'a>,
    info: DocInfo,
}

impl SectionRenderer<'_> {
    fn render(
        &self,
        range: Range<usize>,
        out: &Path,
        tracker: &mut PageNumberTracker,
        stamped: bool,
    ) -> Result<Option<OverlaySummary>> {
        let mapping = merge_items(
            self.analysis,
            range.clone(),
            &self.ctx.build_dir,
            out,
            &self.info,
        )?;
        if stamped {
            let summary = self.engine.apply(out, &mapping, tracker, self.ctx.log)?;
            Ok(Some(summary))
        } else {
            advance_over(tracker, self.analysis, range);
            Ok(None)
        }
    }
}

/// Incremental build: each part is rebuilt, reused from the cache or
/// rendered as an unstamped placeholder, then everything is stitched.
pub(crate) fn build_with_parts(ctx: &BuildContext<'_>, selection: &PartSelection) -> Result<BuildResult> {
    if !ctx.manifest.has_parts() {
        return Err(RectoError::validation(
            "parts",
            "incremental builds need a manifest organized into parts",
        ));
    }
    selection.check(ctx.manifest.parts.len())?;
    let (fonts, resolution) = ctx.prepare()?;
    let analysis = &resolution.analysis;
    let layout: PageLayout = ctx.manifest.layout();
    let cache = PartCache::new(&ctx.cache_dir, &ctx.collection_id);
    let sections = SectionRenderer {
        ctx,
        analysis,
        layout: &layout,
        engine: OverlayEngine::new(&layout, &fonts, ctx.margins),
        info: ctx.doc_info(),
    };

    let mut tracker = PageNumberTracker::new();
    let mut stamps = OverlaySummary::default();
    let mut stitch: Vec<PathBuf> = Vec::new();
    let mut warnings = Vec::new();
    let mut outcomes = Vec::with_capacity(analysis.parts.len());

    let front = analysis.region_range(Region::Front);
    if !front.is_empty() {
        let _t = StageTimer::start(ctx.log, "front");
        let out = ctx.build_dir.join("front.pdf");
        if let Some(summary) = sections.render(front, &out, &mut tracker, true)? {
            stamps.extend(summary);
        }
        stitch.push(out);
    }

    let total_parts = analysis.parts.len();
    for part in &analysis.parts {
        let _t = StageTimer::start(ctx.log, "part");
        ctx.report(
            "part",
            part.index + 1,
            total_parts,
            &format!("part {} `{}`", part.index, part.title),
        );
        let outcome = resolve_part(
            &sections,
            &cache,
            part,
            selection,
            &mut tracker,
            &mut stamps,
            &mut warnings,
        )?;
        if let Some(log) = ctx.log {
            log.log_json(&serde_json::json!({
                "type": "part.decision",
                "part": part.index,
                "key": part.key,
                "state": outcome.state,
                "start_page": part.start_page,
                "pages": part.page_count(),
            }));
        }
        tracing::info!(part = part.index, key = %part.key, state = ?outcome.state, "part resolved");
        stitch.push(outcome.path.clone());
        outcomes.push(outcome);
    }

    let back = analysis.region_range(Region::Back);
    if !back.is_empty() {
        let _t = StageTimer::start(ctx.log, "back");
        let out = ctx.build_dir.join("back.pdf");
        if let Some(summary) = sections.render(back, &out, &mut tracker, true)? {
            stamps.extend(summary);
        }
        stitch.push(out);
    }

    let output_path = ctx.manifest.output_path();
    let stitched_pages = {
        let _t = StageTimer::start(ctx.log, "stitch");
        ctx.report("stitch", 0, stitch.len(), "stitching sections");
        let stitched = ctx.build_dir.join(MERGED_FILE_NAME);
        let pages = concat_pdfs(&stitch, &stitched, &sections.info)?;
        publish(&stitched, &output_path)?;
        pages
    };
    if stitched_pages != analysis.total_pages {
        warnings.push(format!(
            "stitched book has {stitched_pages} pages but the layout expects {}; stale cached parts shift later page numbers",
            analysis.total_pages
        ));
    }

    let count = |state: PartState| outcomes.iter().filter(|o| o.state == state).count();
    let result = BuildResult {
        success: true,
        output_path,
        total_pages: stitched_pages,
        work_count: analysis.work_count(),
        parts_built: count(PartState::Rebuilt),
        parts_cached: count(PartState::CachedReuse),
        parts_placeholder: count(PartState::UncachedFast),
        warnings,
        parts: outcomes,
        toc_passes: resolution.passes,
        toc_entries: resolution.entries.clone(),
        stamps,
    };
    ctx.finish(&result);
    Ok(result)
}

fn resolve_part(
    sections: &SectionRenderer<'_>,
    cache: &PartCache,
    part: &PartAnalysis,
    selection: &PartSelection,
    tracker: &mut PageNumberTracker,
    stamps: &mut OverlaySummary,
    warnings: &mut Vec<String>,
) -> Result<PartOutcome> {
    let analysis = sections.analysis;
    let out = sections
        .ctx
        .build_dir
        .join(format!("part-{}.pdf", sanitize_key(&part.key)));
    let outcome = |state: PartState, path: PathBuf| PartOutcome {
        index: part.index,
        key: part.key.clone(),
        title: part.title.clone(),
        state,
        path,
        start_page: part.start_page,
        page_count: part.page_count(),
    };

    if selection.wants(part.index) {
        if let Some(summary) = sections.render(part.items.clone(), &out, tracker, true)? {
            stamps.extend(summary);
        }
        let fingerprint = part_fingerprint(analysis, part, sections.layout)?;
        cache.store(&part.key, &out, &part_record(part, fingerprint))?;
        return Ok(outcome(PartState::Rebuilt, out));
    }

    if let Some(cached) = cache.lookup(&part.key) {
        match cache.verify(&cached) {
            Ok(pages) => {
                if pages != part.page_count() {
                    warnings.push(format!(
                        "cached part {} `{}` has {} pages but the layout expects {}; rebuild it",
                        part.index,
                        part.title,
                        pages,
                        part.page_count()
                    ));
                }
                let current = part_fingerprint(analysis, part, sections.layout).ok();
                let recorded = cached.record.as_ref().map(|r| r.fingerprint_sha256.clone());
                if let (Some(current), Some(recorded)) = (current, recorded) {
                    if current != recorded {
                        warnings.push(format!(
                            "cached part {} `{}` may be stale: its sources or position changed since it was cached",
                            part.index, part.title
                        ));
                    }
                }
                advance_over(tracker, analysis, part.items.clone());
                return Ok(outcome(PartState::CachedReuse, cached.path));
            }
            Err(err) => {
                warnings.push(format!(
                    "cached part {} `{}` is unusable ({err}); falling back to a placeholder",
                    part.index, part.title
                ));
            }
        }
    }

    sections.render(part.items.clone(), &out, tracker, false)?;
    warnings.push(format!(
        "part {} `{}` has no overlays: rendered without page numbers or headers",
        part.index, part.title
    ));
    Ok(outcome(PartState::UncachedFast, out))
}
