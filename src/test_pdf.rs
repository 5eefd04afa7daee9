//! Fixture PDFs and fonts for unit tests. Each page carries a `LABEL-n`
//! marker so tests can tell which source a merged page came from.

use crate::types::PageBox;
use lopdf::{Document as LoDocument, Object as LoObject, Stream as LoStream, dictionary};
use std::path::Path;

pub(crate) fn write_test_pdf(path: &Path, pages: usize, label: &str) {
    write_test_pdf_sized(path, pages, label, PageBox::LETTER);
}

pub(crate) fn write_test_pdf_sized(path: &Path, pages: usize, label: &str, page_box: PageBox) {
    let mut doc = LoDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let mut kids = Vec::with_capacity(pages);
    for n in 1..=pages {
        let content = format!("BT /F1 18 Tf 72 400 Td ({}-{}) Tj ET", label, n).into_bytes();
        let content_id = doc.add_object(LoStream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(LoObject::Reference(page_id));
    }
    // MediaBox on the Pages node so readers have to resolve inheritance.
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => pages as i64,
        "MediaBox" => page_box.to_objects(),
    };
    doc.objects.insert(pages_id, LoObject::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(path).expect("save fixture pdf");
}

/// Decoded content of every page, in order.
pub(crate) fn page_texts(path: &Path) -> Vec<String> {
    let doc = LoDocument::load(path).expect("load pdf");
    doc.get_pages()
        .values()
        .map(|id| {
            let bytes = doc.get_page_content(*id).expect("page content");
            String::from_utf8_lossy(&bytes).into_owned()
        })
        .collect()
}

pub(crate) const TEST_TTF_UNITS_PER_EM: u16 = 2048;

/// Advance of `glyph` in the fixture font, in font units.
pub(crate) fn test_ttf_advance(glyph: u16) -> u16 {
    if glyph == 0 { 1024 } else { 600 + (glyph % 5) * 160 }
}

fn be16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn be32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Writes a minimal TrueType font mapping ASCII 32..=126 to glyphs 1..=95.
/// It has metrics and a cmap but no outlines.
pub(crate) fn write_test_ttf(path: &Path) {
    const GLYPHS: u16 = 96;

    let mut cmap = Vec::new();
    be16(&mut cmap, 0);
    be16(&mut cmap, 1);
    be16(&mut cmap, 3); // Windows
    be16(&mut cmap, 1); // Unicode BMP
    be32(&mut cmap, 12);
    // Format 4: one segment for ASCII plus the 0xFFFF terminator.
    for value in [4, 32, 0, 4, 4, 1, 0, 126, 0xFFFF, 0, 32, 0xFFFF, (-31i16) as u16, 1, 0, 0] {
        be16(&mut cmap, value);
    }

    let mut head = Vec::new();
    be32(&mut head, 0x0001_0000);
    be32(&mut head, 0x0001_0000);
    be32(&mut head, 0);
    be32(&mut head, 0x5F0F_3CF5);
    be16(&mut head, 0);
    be16(&mut head, TEST_TTF_UNITS_PER_EM);
    head.extend_from_slice(&[0; 16]);
    for value in [-200i16, -500, 1800, 1900] {
        be16(&mut head, value as u16);
    }
    for value in [0, 8, 2, 0, 0] {
        be16(&mut head, value);
    }

    let mut hhea = Vec::new();
    be32(&mut hhea, 0x0001_0000);
    be16(&mut hhea, 1600);
    be16(&mut hhea, (-400i16) as u16);
    be16(&mut hhea, 0);
    hhea.extend_from_slice(&[0; 24]);
    be16(&mut hhea, GLYPHS);

    let mut hmtx = Vec::new();
    for glyph in 0..GLYPHS {
        be16(&mut hmtx, test_ttf_advance(glyph));
        be16(&mut hmtx, 0);
    }

    let mut maxp = Vec::new();
    be32(&mut maxp, 0x0000_5000);
    be16(&mut maxp, GLYPHS);

    // Tags in ascending order.
    let tables: [(&[u8; 4], Vec<u8>); 5] = [
        (b"cmap", cmap),
        (b"head", head),
        (b"hhea", hhea),
        (b"hmtx", hmtx),
        (b"maxp", maxp),
    ];
    let dir_len = 12 + 16 * tables.len();
    let mut font = Vec::new();
    let mut body = Vec::new();
    be32(&mut font, 0x0001_0000);
    be16(&mut font, tables.len() as u16);
    font.extend_from_slice(&[0; 6]);
    for (tag, data) in &tables {
        font.extend_from_slice(*tag);
        be32(&mut font, 0);
        be32(&mut font, (dir_len + body.len()) as u32);
        be32(&mut font, data.len() as u32);
        body.extend_from_slice(data);
        while body.len() % 4 != 0 {
            body.push(0);
        }
    }
    font.extend_from_slice(&body);
    std::fs::write(path, font).expect("write fixture font");
}
