use fixed::types::I32F32;
use lopdf::Object as LoObject;

/// A page rectangle in PDF user space (points, origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub llx: f32,
    pub lly: f32,
    pub urx: f32,
    pub ury: f32,
}

impl PageBox {
    // 8.5in x 11in at 72pt/in.
    pub const LETTER: PageBox = PageBox {
        llx: 0.0,
        lly: 0.0,
        urx: 612.0,
        ury: 792.0,
    };

    pub fn new(llx: f32, lly: f32, urx: f32, ury: f32) -> Self {
        Self {
            llx: llx.min(urx),
            lly: lly.min(ury),
            urx: llx.max(urx),
            ury: lly.max(ury),
        }
    }

    pub fn width(&self) -> f32 {
        self.urx - self.llx
    }

    pub fn height(&self) -> f32 {
        self.ury - self.lly
    }

    pub fn from_objects(values: &[LoObject]) -> Option<Self> {
        if values.len() != 4 {
            return None;
        }
        let mut nums = [0.0f32; 4];
        for (slot, value) in nums.iter_mut().zip(values) {
            *slot = number_value(value)?;
        }
        let page_box = PageBox::new(nums[0], nums[1], nums[2], nums[3]);
        if page_box.width() <= 0.0 || page_box.height() <= 0.0 {
            return None;
        }
        Some(page_box)
    }

    pub fn to_objects(&self) -> Vec<LoObject> {
        [self.llx, self.lly, self.urx, self.ury]
            .iter()
            .map(|v| quantize(*v))
            .map(|milli| {
                if milli % 1000 == 0 {
                    LoObject::Integer(milli / 1000)
                } else {
                    LoObject::Real((milli as f64 / 1000.0) as _)
                }
            })
            .collect()
    }

    /// Stable key used for naming blank filler files.
    pub fn size_key(&self) -> String {
        format!("{}x{}", fmt_num(self.width()), fmt_num(self.height()))
    }
}

/// Distances from the page edges at which running heads and folios sit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub header_from_top: f32,
    pub footer_from_bottom: f32,
    pub side: f32,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            header_from_top: 36.0,
            footer_from_bottom: 36.0,
            side: 54.0,
        }
    }
}

pub(crate) fn number_value(value: &LoObject) -> Option<f32> {
    match value {
        LoObject::Integer(v) => Some(*v as f32),
        LoObject::Real(v) => Some(*v as f32),
        _ => None,
    }
}

fn quantize(value: f32) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    let fixed = I32F32::saturating_from_num(value);
    let scaled = fixed.saturating_mul(I32F32::from_num(1000)).round();
    scaled.to_num()
}

/// Formats a coordinate for a content stream, rounded to 1/1000 pt so equal
/// inputs always produce byte-identical streams.
pub(crate) fn fmt_num(value: f32) -> String {
    format_milli(quantize(value))
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
        while s.ends_with('0') {
            s.pop();
        }
        s
    }
}
