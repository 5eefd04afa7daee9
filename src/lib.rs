mod analyzer;
mod cache;
mod debug;
mod error;
mod font;
mod manifest;
mod mapping;
mod merge;
mod numbering;
mod overlay;
mod pdfinfo;
mod pipeline;
#[cfg(test)]
mod test_pdf;
mod toc;
mod types;

pub use analyzer::{
    AnalysisResult, Analyzer, ContentItem, DEFAULT_TOC_ESTIMATE, ItemKind, PartAnalysis,
    TocReservation, analyze,
};
pub use cache::{CachedPart, PartCache, part_fingerprint, part_record, sanitize_key};
pub use debug::BuildLog;
pub use error::{RectoError, Result};
pub use font::{FontRole, FontSet, LoadedFont, encode_winansi, pdf_literal};
pub use manifest::{
    BackMatterItem, FrontMatterItem, HeaderContent, Manifest, PageLayout, PageNumberPosition,
    PartEntry, SuppressPageNumbers, Typography, WorkEntry, expand_home,
};
pub use mapping::{MappedPage, PageMapping};
pub use merge::{
    Assembler, DocInfo, PageContent, blank_filler, concat_pdfs, merge_analysis, merge_items,
    save_page_document,
};
pub use numbering::{NumberStyle, PageNumberTracker, Region, to_roman};
pub use overlay::{OverlayEngine, OverlaySummary, StampRecord};
pub use pdfinfo::{PdfInfo, inspect_pdf, page_box, page_count};
pub use pipeline::{
    BuildResult, PartOutcome, PartSelection, PartState, ProgressCallback,
};
pub use recto_cache_index::CacheEntryRecord;
pub use toc::{
    BuiltinTocRenderer, MAX_TOC_PASSES, TOC_FILE_NAME, TocEntry, TocInputs, TocRenderContext,
    TocRenderer, TocResolution, generate_toc_entries, resolve_toc,
};
pub use types::{Margins, PageBox};

use std::path::{Path, PathBuf};
use std::sync::Arc;

const BUILD_DIR_NAME: &str = ".recto-build";
const CACHE_DIR_NAME: &str = ".recto-cache";

/// Assembles books described by a [`Manifest`].
///
/// A `Binder` holds the settings that are not part of the book itself, such as
/// where intermediate files and cached parts live. One binder can build many
/// manifests.
pub struct Binder {
    build_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    collection_id: Option<String>,
    toc_estimate: usize,
    toc_renderer: Arc<dyn TocRenderer>,
    progress: Option<ProgressCallback>,
    debug: Option<BuildLog>,
    margins: Margins,
}

#[derive(Clone)]
pub struct BinderBuilder {
    build_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    collection_id: Option<String>,
    toc_estimate: usize,
    toc_renderer: Arc<dyn TocRenderer>,
    progress: Option<ProgressCallback>,
    debug_path: Option<PathBuf>,
    margins: Margins,
}

impl Binder {
    pub fn builder() -> BinderBuilder {
        BinderBuilder::new()
    }

    /// Builds the whole book in one pass and writes it to the manifest's
    /// output path.
    pub fn build(&self, manifest: &Manifest) -> Result<BuildResult> {
        let ctx = self.context(manifest);
        let result = pipeline::build(&ctx);
        self.log_failure(&result);
        result
    }

    /// Builds a part-organized book, rebuilding only the selected parts and
    /// reusing cached renders of the others.
    pub fn build_with_parts(
        &self,
        manifest: &Manifest,
        selection: &PartSelection,
    ) -> Result<BuildResult> {
        let ctx = self.context(manifest);
        let result = pipeline::build_with_parts(&ctx, selection);
        self.log_failure(&result);
        result
    }

    /// Loads a manifest file and builds it.
    pub fn build_file(&self, manifest_path: impl AsRef<Path>) -> Result<BuildResult> {
        let manifest = Manifest::load(manifest_path.as_ref())?;
        self.build(&manifest)
    }

    /// The part cache this binder uses for `manifest`.
    pub fn part_cache(&self, manifest: &Manifest) -> PartCache {
        PartCache::new(&self.cache_dir_for(manifest), &self.collection_id_for(manifest))
    }

    pub fn build_dir_for(&self, manifest: &Manifest) -> PathBuf {
        self.build_dir
            .clone()
            .unwrap_or_else(|| output_dir(manifest).join(BUILD_DIR_NAME))
    }

    pub fn cache_dir_for(&self, manifest: &Manifest) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| output_dir(manifest).join(CACHE_DIR_NAME))
    }

    fn collection_id_for(&self, manifest: &Manifest) -> String {
        self.collection_id
            .clone()
            .unwrap_or_else(|| manifest.title.clone())
    }

    fn context<'a>(&'a self, manifest: &'a Manifest) -> pipeline::BuildContext<'a> {
        pipeline::BuildContext {
            manifest,
            build_dir: self.build_dir_for(manifest),
            cache_dir: self.cache_dir_for(manifest),
            collection_id: self.collection_id_for(manifest),
            toc_estimate: self.toc_estimate,
            toc_renderer: self.toc_renderer.as_ref(),
            progress: self.progress.as_ref(),
            log: self.debug.as_ref(),
            margins: self.margins,
        }
    }

    fn log_failure(&self, result: &Result<BuildResult>) {
        let Err(err) = result else {
            return;
        };
        tracing::error!(error = %err, "build failed");
        if let Some(log) = self.debug.as_ref() {
            log.log_json(&serde_json::json!({
                "type": "build.error",
                "message": err.to_string(),
            }));
            log.flush();
        }
    }
}

fn output_dir(manifest: &Manifest) -> PathBuf {
    manifest
        .output_path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl BinderBuilder {
    pub fn new() -> Self {
        Self {
            build_dir: None,
            cache_dir: None,
            collection_id: None,
            toc_estimate: DEFAULT_TOC_ESTIMATE,
            toc_renderer: Arc::new(BuiltinTocRenderer::default()),
            progress: None,
            debug_path: None,
            margins: Margins::default(),
        }
    }

    // Scratch directory for merged sections, the rendered TOC and blank fillers.
    pub fn build_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_dir = Some(path.into());
        self
    }

    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    // Namespace for cached parts; defaults to the book title.
    pub fn collection_id(mut self, id: impl Into<String>) -> Self {
        self.collection_id = Some(id.into());
        self
    }

    // Pages reserved for the table of contents before it is first rendered.
    pub fn toc_estimate(mut self, pages: usize) -> Self {
        self.toc_estimate = pages;
        self
    }

    pub fn toc_renderer(mut self, renderer: Arc<dyn TocRenderer>) -> Self {
        self.toc_renderer = renderer;
        self
    }

    pub fn progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, usize, usize, &str) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    // Enable JSONL build logging.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self
    }

    pub fn build(self) -> Result<Binder> {
        if self.toc_estimate == 0 {
            return Err(RectoError::validation(
                "tocEstimate",
                "at least one page must be reserved for the table of contents",
            ));
        }
        let Margins {
            header_from_top,
            footer_from_bottom,
            side,
        } = self.margins;
        if [header_from_top, footer_from_bottom, side]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(RectoError::validation(
                "margins",
                "margins must be finite and non-negative",
            ));
        }
        let debug = if let Some(path) = self.debug_path {
            Some(BuildLog::create(path)?)
        } else {
            None
        };
        Ok(Binder {
            build_dir: self.build_dir,
            cache_dir: self.cache_dir,
            collection_id: self.collection_id,
            toc_estimate: self.toc_estimate,
            toc_renderer: self.toc_renderer,
            progress: self.progress,
            debug,
            margins: self.margins,
        })
    }
}

impl Default for BinderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
