use crate::error::{RectoError, Result};
use crate::manifest::{Typography, expand_home};
use lopdf::{Document as LoDocument, Object as LoObject, ObjectId, Stream as LoStream, dictionary};
use std::path::Path;
use std::sync::Arc;

const FIRST_CHAR: u8 = 32;
const LAST_CHAR: u8 = 255;

// cp1252 code points 0x80..=0x9F that differ from Latin-1.
const WINANSI_EXTENSIONS: [(char, u8); 27] = [
    ('\u{20AC}', 0x80),
    ('\u{201A}', 0x82),
    ('\u{0192}', 0x83),
    ('\u{201E}', 0x84),
    ('\u{2026}', 0x85),
    ('\u{2020}', 0x86),
    ('\u{2021}', 0x87),
    ('\u{02C6}', 0x88),
    ('\u{2030}', 0x89),
    ('\u{0160}', 0x8A),
    ('\u{2039}', 0x8B),
    ('\u{0152}', 0x8C),
    ('\u{017D}', 0x8E),
    ('\u{2018}', 0x91),
    ('\u{2019}', 0x92),
    ('\u{201C}', 0x93),
    ('\u{201D}', 0x94),
    ('\u{2022}', 0x95),
    ('\u{2013}', 0x96),
    ('\u{2014}', 0x97),
    ('\u{02DC}', 0x98),
    ('\u{2122}', 0x99),
    ('\u{0161}', 0x9A),
    ('\u{203A}', 0x9B),
    ('\u{0153}', 0x9C),
    ('\u{017E}', 0x9E),
    ('\u{0178}', 0x9F),
];

// AFM advance widths for 32..=126.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, 1015, 667, 667, 722, 722, 667,
    611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667,
    667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500,
    222, 833, 556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

const TIMES_WIDTHS: [u16; 95] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333, 250, 278, 500, 500, 500,
    500, 500, 500, 500, 500, 500, 500, 278, 278, 564, 564, 564, 444, 921, 722, 667, 667, 722, 611,
    556, 722, 722, 333, 389, 722, 611, 889, 722, 722, 556, 722, 667, 556, 611, 722, 722, 944, 722,
    722, 611, 333, 278, 333, 469, 500, 333, 444, 500, 444, 500, 444, 333, 500, 500, 278, 278, 500,
    278, 778, 500, 500, 500, 500, 333, 389, 278, 500, 500, 722, 500, 500, 444, 480, 200, 480, 541,
];

const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, 975, 722, 722, 722, 722, 667,
    611, 778, 722, 278, 556, 722, 611, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667,
    667, 611, 333, 278, 333, 584, 556, 333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556,
    278, 889, 611, 611, 611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

const TIMES_BOLD_WIDTHS: [u16; 95] = [
    250, 333, 555, 500, 500, 1000, 833, 278, 333, 333, 500, 570, 250, 333, 250, 278, 500, 500, 500,
    500, 500, 500, 500, 500, 500, 500, 333, 333, 570, 570, 570, 500, 930, 722, 667, 722, 722, 667,
    611, 778, 778, 389, 500, 778, 667, 944, 722, 778, 611, 778, 722, 556, 667, 722, 722, 1000, 722,
    722, 667, 333, 278, 333, 581, 500, 333, 500, 556, 444, 556, 444, 333, 500, 556, 278, 333, 556,
    278, 833, 556, 500, 556, 556, 444, 389, 333, 556, 500, 722, 500, 500, 444, 394, 220, 394, 520,
];

const TIMES_ITALIC_WIDTHS: [u16; 95] = [
    250, 333, 420, 500, 500, 833, 778, 214, 333, 333, 500, 675, 250, 333, 250, 278, 500, 500, 500,
    500, 500, 500, 500, 500, 500, 500, 333, 333, 675, 675, 675, 500, 920, 611, 611, 667, 722, 611,
    611, 722, 722, 333, 444, 667, 556, 833, 667, 722, 611, 722, 611, 500, 556, 722, 611, 833, 611,
    556, 556, 389, 278, 389, 422, 500, 333, 500, 500, 444, 500, 444, 278, 500, 500, 278, 278, 444,
    278, 722, 500, 500, 500, 500, 389, 389, 278, 500, 444, 667, 444, 444, 389, 400, 275, 400, 541,
];

const TIMES_BOLD_ITALIC_WIDTHS: [u16; 95] = [
    250, 389, 555, 500, 500, 833, 778, 278, 333, 333, 500, 570, 250, 333, 250, 278, 500, 500, 500,
    500, 500, 500, 500, 500, 500, 500, 333, 333, 570, 570, 570, 500, 832, 667, 667, 667, 722, 667,
    667, 722, 778, 389, 500, 667, 611, 889, 722, 722, 611, 722, 667, 556, 611, 722, 667, 889, 667,
    611, 611, 333, 278, 333, 570, 500, 333, 500, 500, 444, 500, 444, 333, 500, 556, 278, 278, 500,
    278, 778, 556, 500, 500, 500, 389, 389, 278, 556, 444, 667, 500, 444, 389, 348, 220, 348, 570,
];

const BASE14_NAMES: [&str; 14] = [
    "Courier",
    "Courier-Bold",
    "Courier-Oblique",
    "Courier-BoldOblique",
    "Helvetica",
    "Helvetica-Bold",
    "Helvetica-Oblique",
    "Helvetica-BoldOblique",
    "Times-Roman",
    "Times-Bold",
    "Times-Italic",
    "Times-BoldItalic",
    "Symbol",
    "ZapfDingbats",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontRole {
    Header,
    PageNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FontProgramKind {
    TrueType,
    OpenTypeCff,
}

#[derive(Debug)]
struct EmbeddedMetrics {
    widths: Vec<u16>,
    ascent: i16,
    descent: i16,
    cap_height: i16,
    italic_angle: i16,
    bbox: (i16, i16, i16, i16),
    is_fixed_pitch: bool,
}

#[derive(Debug)]
enum FontSource {
    Base14,
    Embedded {
        data: Vec<u8>,
        metrics: EmbeddedMetrics,
        program: FontProgramKind,
    },
}

/// A resolved font: either one of the fourteen standard PDF fonts or a
/// TrueType/OpenType file embedded on install.
#[derive(Debug)]
pub struct LoadedFont {
    base_font: String,
    source: FontSource,
}

/// The fonts used for running heads and folios, resolved once per build.
#[derive(Debug, Clone)]
pub struct FontSet {
    header: Arc<LoadedFont>,
    page_number: Arc<LoadedFont>,
}

impl FontSet {
    /// Resolves the typography fonts. Idempotent: calling it again with the
    /// same typography yields an equivalent set.
    pub fn ensure(typography: &Typography) -> Result<FontSet> {
        let header = Arc::new(LoadedFont::resolve(&typography.header_font)?);
        let page_number = if typography.page_number_font == typography.header_font {
            Arc::clone(&header)
        } else {
            Arc::new(LoadedFont::resolve(&typography.page_number_font)?)
        };
        tracing::debug!(
            header = %header.base_font,
            page_number = %page_number.base_font,
            "fonts ready"
        );
        Ok(FontSet {
            header,
            page_number,
        })
    }

    pub fn font(&self, role: FontRole) -> &LoadedFont {
        match role {
            FontRole::Header => &self.header,
            FontRole::PageNumber => &self.page_number,
        }
    }

    pub fn measure(&self, role: FontRole, size: f32, text: &str) -> f32 {
        self.font(role).measure(size, text)
    }
}

impl LoadedFont {
    pub fn resolve(name: &str) -> Result<LoadedFont> {
        if let Some(canonical) = base14_name(name) {
            return Ok(LoadedFont {
                base_font: canonical.to_string(),
                source: FontSource::Base14,
            });
        }
        let path = expand_home(Path::new(name.trim()));
        if !path.is_file() {
            return Err(RectoError::Font(format!(
                "`{name}` is neither a standard PDF font nor a readable font file"
            )));
        }
        let data = std::fs::read(&path)?;
        let (metrics, program) = {
            let face = ttf_parser::Face::parse(&data, 0).map_err(|err| {
                RectoError::Font(format!("{}: {err}", path.display()))
            })?;
            embedded_metrics(&face)
        };
        Ok(LoadedFont {
            base_font: sanitize_font_name(&path),
            source: FontSource::Embedded {
                data,
                metrics,
                program,
            },
        })
    }

    pub fn base_font(&self) -> &str {
        &self.base_font
    }

    fn width_of(&self, code: u8) -> u16 {
        match &self.source {
            FontSource::Base14 => base14_width(&self.base_font, code),
            FontSource::Embedded { metrics, .. } => code
                .checked_sub(FIRST_CHAR)
                .and_then(|idx| metrics.widths.get(idx as usize).copied())
                .unwrap_or(0),
        }
    }

    /// Advance width of `text` at `size` points.
    pub fn measure(&self, size: f32, text: &str) -> f32 {
        let units: u32 = encode_winansi(text)
            .iter()
            .map(|code| self.width_of(*code) as u32)
            .sum();
        units as f32 * size / 1000.0
    }

    /// Adds the font objects to `doc` and returns the font dictionary id.
    pub fn install(&self, doc: &mut LoDocument) -> ObjectId {
        match &self.source {
            FontSource::Base14 => {
                let mut dict = dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => self.base_font.as_str(),
                };
                if !uses_builtin_encoding(&self.base_font) {
                    dict.set("Encoding", "WinAnsiEncoding");
                }
                doc.add_object(dict)
            }
            FontSource::Embedded {
                data,
                metrics,
                program,
            } => {
                let mut file_dict = dictionary! { "Length1" => data.len() as i64 };
                if *program == FontProgramKind::OpenTypeCff {
                    file_dict.set("Subtype", "OpenType");
                }
                let file_id = doc.add_object(LoStream::new(file_dict, data.clone()));
                let file_key = match program {
                    FontProgramKind::TrueType => "FontFile2",
                    FontProgramKind::OpenTypeCff => "FontFile3",
                };
                let flags: i64 = if metrics.is_fixed_pitch { 33 } else { 32 };
                let descriptor_id = doc.add_object(dictionary! {
                    "Type" => "FontDescriptor",
                    "FontName" => self.base_font.as_str(),
                    "Flags" => flags,
                    "FontBBox" => vec![
                        LoObject::Integer(metrics.bbox.0 as i64),
                        LoObject::Integer(metrics.bbox.1 as i64),
                        LoObject::Integer(metrics.bbox.2 as i64),
                        LoObject::Integer(metrics.bbox.3 as i64),
                    ],
                    "ItalicAngle" => metrics.italic_angle as i64,
                    "Ascent" => metrics.ascent as i64,
                    "Descent" => metrics.descent as i64,
                    "CapHeight" => metrics.cap_height as i64,
                    "StemV" => 80_i64,
                    file_key => file_id,
                });
                let subtype = match program {
                    FontProgramKind::TrueType => "TrueType",
                    FontProgramKind::OpenTypeCff => "Type1",
                };
                let widths: Vec<LoObject> = metrics
                    .widths
                    .iter()
                    .map(|w| LoObject::Integer(*w as i64))
                    .collect();
                doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => subtype,
                    "BaseFont" => self.base_font.as_str(),
                    "FirstChar" => FIRST_CHAR as i64,
                    "LastChar" => LAST_CHAR as i64,
                    "Widths" => widths,
                    "FontDescriptor" => descriptor_id,
                    "Encoding" => "WinAnsiEncoding",
                })
            }
        }
    }
}

fn base14_name(name: &str) -> Option<&'static str> {
    let wanted = name.trim().trim_matches('"').trim_matches('\'');
    BASE14_NAMES
        .iter()
        .copied()
        .find(|candidate| candidate.eq_ignore_ascii_case(wanted))
}

fn base14_width(base_font: &str, code: u8) -> u16 {
    // Obliques share the upright advances. Symbol and ZapfDingbats are
    // measured at a flat 600, which over-estimates most of their glyphs.
    let table = match base_font {
        "Helvetica" | "Helvetica-Oblique" => &HELVETICA_WIDTHS,
        "Helvetica-Bold" | "Helvetica-BoldOblique" => &HELVETICA_BOLD_WIDTHS,
        "Times-Roman" => &TIMES_WIDTHS,
        "Times-Bold" => &TIMES_BOLD_WIDTHS,
        "Times-Italic" => &TIMES_ITALIC_WIDTHS,
        "Times-BoldItalic" => &TIMES_BOLD_ITALIC_WIDTHS,
        _ => return 600,
    };
    match code {
        32..=126 => table[(code - 32) as usize],
        // Latin-1 letters: the width of `n`.
        _ => table[(b'n' - 32) as usize],
    }
}

/// Symbol and ZapfDingbats carry their own encoding.
fn uses_builtin_encoding(base_font: &str) -> bool {
    matches!(base_font, "Symbol" | "ZapfDingbats")
}

fn embedded_metrics(face: &ttf_parser::Face<'_>) -> (EmbeddedMetrics, FontProgramKind) {
    let scale = 1000.0 / face.units_per_em().max(1) as f32;
    let widths = (FIRST_CHAR..=LAST_CHAR)
        .map(|code| {
            decode_winansi(code)
                .and_then(|ch| face.glyph_index(ch))
                .and_then(|gid| face.glyph_hor_advance(gid))
                .map(|adv| ((adv as f32 * scale).round() as i32).clamp(0, u16::MAX as i32) as u16)
                .unwrap_or(0)
        })
        .collect();
    let bbox = face.global_bounding_box();
    let ascent = scale_i16(face.ascender(), scale);
    let metrics = EmbeddedMetrics {
        widths,
        ascent,
        descent: scale_i16(face.descender(), scale),
        cap_height: face
            .capital_height()
            .map(|v| scale_i16(v, scale))
            .unwrap_or(ascent),
        italic_angle: face.italic_angle().map(|v| v.round() as i16).unwrap_or(0),
        bbox: (
            scale_i16(bbox.x_min, scale),
            scale_i16(bbox.y_min, scale),
            scale_i16(bbox.x_max, scale),
            scale_i16(bbox.y_max, scale),
        ),
        is_fixed_pitch: face.is_monospaced(),
    };
    let program = if face.tables().cff.is_some() {
        FontProgramKind::OpenTypeCff
    } else {
        FontProgramKind::TrueType
    };
    (metrics, program)
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    (value as f32 * scale).round() as i16
}

fn sanitize_font_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if cleaned.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        cleaned
    }
}

fn decode_winansi(code: u8) -> Option<char> {
    match code {
        0x80..=0x9F => WINANSI_EXTENSIONS
            .iter()
            .find(|(_, b)| *b == code)
            .map(|(ch, _)| *ch),
        _ => Some(code as char),
    }
}

/// Encodes `text` as WinAnsi bytes; characters outside the code page become `?`.
pub fn encode_winansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch {
            '\u{0020}'..='\u{007E}' | '\u{00A0}'..='\u{00FF}' => ch as u8,
            _ => WINANSI_EXTENSIONS
                .iter()
                .find(|(c, _)| *c == ch)
                .map(|(_, b)| *b)
                .unwrap_or(b'?'),
        })
        .collect()
}

/// PDF literal string (with parentheses) for WinAnsi-encoded `text`.
pub fn pdf_literal(text: &str) -> String {
    let mut out = String::from("(");
    for byte in encode_winansi(text) {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b if !(0x20..0x7f).contains(&b) => out.push_str(&format!("\\{:03o}", b)),
            b => out.push(b as char),
        }
    }
    out.push(')');
    out
}
