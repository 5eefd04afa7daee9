use crate::cache::sanitize_key;
use crate::error::{RectoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const TOC_KINDS: [&str; 3] = ["toc", "contents", "table_of_contents"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,
    #[serde(default)]
    pub typography: Typography,
    #[serde(default)]
    pub page_number_position: PageNumberPosition,
    #[serde(default)]
    pub suppress_page_numbers: SuppressPageNumbers,
    #[serde(default = "default_true")]
    pub works_start_recto: bool,
    #[serde(default = "default_verso_header")]
    pub verso_header: HeaderContent,
    #[serde(default = "default_recto_header")]
    pub recto_header: HeaderContent,
    #[serde(default)]
    pub front_matter: Vec<FrontMatterItem>,
    #[serde(default)]
    pub parts: Vec<PartEntry>,
    #[serde(default)]
    pub works: Vec<WorkEntry>,
    #[serde(default)]
    pub back_matter: Vec<BackMatterItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Typography {
    pub header_font: String,
    pub header_size: f32,
    pub page_number_font: String,
    pub page_number_size: f32,
}

impl Default for Typography {
    fn default() -> Self {
        Self {
            header_font: "Times-Italic".to_string(),
            header_size: 9.0,
            page_number_font: "Times-Roman".to_string(),
            page_number_size: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageNumberPosition {
    #[default]
    Centered,
    Outer,
    #[serde(rename = "none")]
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressPageNumbers {
    Never,
    SectionStarts,
    EssayStarts,
    #[default]
    Both,
}

impl SuppressPageNumbers {
    pub fn on_part_dividers(self) -> bool {
        matches!(self, SuppressPageNumbers::SectionStarts | SuppressPageNumbers::Both)
    }

    pub fn on_work_openings(self) -> bool {
        matches!(self, SuppressPageNumbers::EssayStarts | SuppressPageNumbers::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderContent {
    BookTitle,
    SectionTitle,
    EssayTitle,
    #[serde(rename = "none")]
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontMatterItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub pdf: PathBuf,
    #[serde(default)]
    pub placeholder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl FrontMatterItem {
    pub fn is_toc_placeholder(&self) -> bool {
        self.placeholder && is_toc_kind(&self.kind)
    }

    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| humanize_kind(&self.kind))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pdf: PathBuf,
    #[serde(default)]
    pub works: Vec<WorkEntry>,
    #[serde(default)]
    pub no_divider: bool,
}

impl PartEntry {
    pub fn has_divider(&self) -> bool {
        !self.no_divider && !self.pdf.as_os_str().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pdf: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackMatterItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub pdf: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl BackMatterItem {
    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| humanize_kind(&self.kind))
    }
}

/// Everything the page-level predicates and the overlay engine need to know
/// about a book's layout, detached from its content lists.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub book_title: String,
    pub typography: Typography,
    pub page_number_position: PageNumberPosition,
    pub suppress_page_numbers: SuppressPageNumbers,
    pub verso_header: HeaderContent,
    pub recto_header: HeaderContent,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            book_title: String::new(),
            typography: Typography::default(),
            page_number_position: PageNumberPosition::default(),
            suppress_page_numbers: SuppressPageNumbers::default(),
            verso_header: default_verso_header(),
            recto_header: default_recto_header(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_verso_header() -> HeaderContent {
    HeaderContent::BookTitle
}

fn default_recto_header() -> HeaderContent {
    HeaderContent::EssayTitle
}

fn is_toc_kind(kind: &str) -> bool {
    let kind = kind.trim().to_ascii_lowercase();
    TOC_KINDS.contains(&kind.as_str())
}

// "acknowledgements" -> "Acknowledgements", "about_the_author" -> "About The Author"
fn humanize_kind(kind: &str) -> String {
    kind.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Expands a leading `~` to the current user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(std::path::Component::Normal(first)) if first == "~" => {
            match std::env::var_os("HOME") {
                Some(home) => PathBuf::from(home).join(components.as_path()),
                None => path.to_path_buf(),
            }
        }
        _ => path.to_path_buf(),
    }
}

fn require_pdf(field: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(RectoError::validation(field, "pdf path is required"));
    }
    let expanded = expand_home(path);
    if !expanded.is_file() {
        return Err(RectoError::validation(
            field,
            format!("file does not exist: {}", expanded.display()),
        ));
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RectoError::validation(field, "must not be empty"));
    }
    Ok(())
}

impl Manifest {
    /// Parses and validates a manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_home(path.as_ref());
        let raw = std::fs::read_to_string(&path)?;
        let manifest = Self::from_json_str(&raw)?;
        tracing::debug!(path = %path.display(), "manifest loaded");
        Ok(manifest)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural validation. Touches the filesystem only to check that
    /// referenced PDFs exist.
    pub fn validate(&self) -> Result<()> {
        require_text("title", &self.title)?;
        if self.output_path.as_os_str().is_empty() {
            return Err(RectoError::validation("outputPath", "must not be empty"));
        }
        match (self.parts.is_empty(), self.works.is_empty()) {
            (true, true) => {
                return Err(RectoError::validation(
                    "parts/works",
                    "one of parts or works must be populated",
                ));
            }
            (false, false) => {
                return Err(RectoError::validation(
                    "parts/works",
                    "parts and works are mutually exclusive",
                ));
            }
            _ => {}
        }
        for (name, size) in [
            ("typography.headerSize", self.typography.header_size),
            ("typography.pageNumberSize", self.typography.page_number_size),
        ] {
            if !size.is_finite() || size <= 0.0 {
                return Err(RectoError::validation(name, "must be a positive number"));
            }
        }

        let mut toc_seen = false;
        for (idx, item) in self.front_matter.iter().enumerate() {
            if item.placeholder {
                if !is_toc_kind(&item.kind) {
                    return Err(RectoError::validation(
                        format!("frontMatter[{idx}].placeholder"),
                        format!(
                            "only the table of contents may be a placeholder (type `{}`)",
                            item.kind
                        ),
                    ));
                }
                if toc_seen {
                    return Err(RectoError::validation(
                        format!("frontMatter[{idx}]"),
                        "more than one table of contents placeholder",
                    ));
                }
                toc_seen = true;
                continue;
            }
            require_pdf(&format!("frontMatter[{idx}].pdf"), &item.pdf)?;
        }

        let mut part_keys = BTreeSet::new();
        let mut file_keys = BTreeMap::new();
        for (p_idx, part) in self.parts.iter().enumerate() {
            require_text(&format!("parts[{p_idx}].title"), &part.title)?;
            let key = self.part_key(p_idx);
            if !part_keys.insert(key.clone()) {
                return Err(RectoError::validation(
                    format!("parts[{p_idx}].id"),
                    format!("duplicate part id `{key}`"),
                ));
            }
            // Cache and build files are named by the sanitized key.
            if let Some(other) = file_keys.insert(sanitize_key(&key), key.clone()) {
                return Err(RectoError::validation(
                    format!("parts[{p_idx}].id"),
                    format!(
                        "part id `{key}` collides with `{other}` (both stored as `{}`)",
                        sanitize_key(&key)
                    ),
                ));
            }
            if part.has_divider() {
                require_pdf(&format!("parts[{p_idx}].pdf"), &part.pdf)?;
            } else if part.works.is_empty() {
                return Err(RectoError::validation(
                    format!("parts[{p_idx}]"),
                    "part has neither a divider nor works",
                ));
            }
            for (w_idx, work) in part.works.iter().enumerate() {
                require_text(&format!("parts[{p_idx}].works[{w_idx}].title"), &work.title)?;
                require_pdf(&format!("parts[{p_idx}].works[{w_idx}].pdf"), &work.pdf)?;
            }
        }
        for (w_idx, work) in self.works.iter().enumerate() {
            require_text(&format!("works[{w_idx}].title"), &work.title)?;
            require_pdf(&format!("works[{w_idx}].pdf"), &work.pdf)?;
        }
        for (idx, item) in self.back_matter.iter().enumerate() {
            require_pdf(&format!("backMatter[{idx}].pdf"), &item.pdf)?;
        }
        Ok(())
    }

    pub fn has_parts(&self) -> bool {
        !self.parts.is_empty()
    }

    pub fn has_toc(&self) -> bool {
        self.front_matter.iter().any(FrontMatterItem::is_toc_placeholder)
    }

    pub fn work_count(&self) -> usize {
        if self.has_parts() {
            self.parts.iter().map(|p| p.works.len()).sum()
        } else {
            self.works.len()
        }
    }

    /// Stable cache identity of a part: its `id`, else its position.
    pub fn part_key(&self, index: usize) -> String {
        match self.parts.get(index) {
            Some(part) if !part.id.trim().is_empty() => part.id.trim().to_string(),
            _ => format!("part-{index}"),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        expand_home(&self.output_path)
    }

    pub fn layout(&self) -> PageLayout {
        PageLayout {
            book_title: self.title.clone(),
            typography: self.typography.clone(),
            page_number_position: self.page_number_position,
            suppress_page_numbers: self.suppress_page_numbers,
            verso_header: self.verso_header,
            recto_header: self.recto_header,
        }
    }
}
