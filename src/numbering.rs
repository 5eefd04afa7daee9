use serde::Serialize;

/// Numbering region of a physical page. Each region owns an independent
/// counter that restarts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Front,
    Body,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberStyle {
    LowerRoman,
    Arabic,
}

impl Region {
    pub fn style(self) -> NumberStyle {
        match self {
            Region::Front => NumberStyle::LowerRoman,
            Region::Body | Region::Back => NumberStyle::Arabic,
        }
    }
}

impl NumberStyle {
    pub fn format(self, value: usize) -> String {
        match self {
            NumberStyle::LowerRoman => to_roman(value),
            NumberStyle::Arabic => value.to_string(),
        }
    }
}

pub fn to_roman(mut value: usize) -> String {
    const TABLE: [(usize, &str); 13] = [
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut out = String::new();
    for (n, glyphs) in TABLE {
        while value >= n {
            out.push_str(glyphs);
            value -= n;
        }
    }
    out
}

/// Running page counters shared by the analyzer, the TOC generator and the
/// overlay engine. Every page advances its region's counter whether or not a
/// number ends up printed on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageNumberTracker {
    front: usize,
    body: usize,
    back: usize,
}

impl PageNumberTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, region: Region) -> &mut usize {
        match region {
            Region::Front => &mut self.front,
            Region::Body => &mut self.body,
            Region::Back => &mut self.back,
        }
    }

    /// Counts one page in `region` and returns its number.
    pub fn advance(&mut self, region: Region) -> usize {
        let slot = self.slot(region);
        *slot += 1;
        *slot
    }

    /// Counts `pages` pages at once; returns the number of the first one.
    pub fn advance_by(&mut self, region: Region, pages: usize) -> usize {
        let slot = self.slot(region);
        let first = *slot + 1;
        *slot += pages;
        first
    }

    /// Number the next page in `region` would receive.
    pub fn peek(&self, region: Region) -> usize {
        self.current(region) + 1
    }

    pub fn current(&self, region: Region) -> usize {
        match region {
            Region::Front => self.front,
            Region::Body => self.body,
            Region::Back => self.back,
        }
    }
}
