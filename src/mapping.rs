use crate::analyzer::{ContentItem, ItemKind};
use crate::manifest::{PageLayout, PageNumberPosition};
use crate::numbering::{NumberStyle, Region};

/// One page of a merged file and the content it came from.
#[derive(Debug, Clone, Copy)]
pub struct MappedPage<'a> {
    /// Page number within the whole book, which decides recto/verso.
    pub physical_page: usize,
    /// 0-based page index within the merged file.
    pub output_index: usize,
    pub item_index: usize,
    pub item: &'a ContentItem,
    /// 0-based page index within the item.
    pub page_in_item: usize,
}

impl MappedPage<'_> {
    pub fn is_first_page_of_item(&self) -> bool {
        self.page_in_item == 0
    }

    pub fn should_show_header(&self) -> bool {
        self.item.kind == ItemKind::Work && !self.is_first_page_of_item()
    }

    pub fn should_show_page_number(&self, layout: &PageLayout) -> bool {
        if layout.page_number_position == PageNumberPosition::Hidden {
            return false;
        }
        match self.item.kind {
            ItemKind::Blank => false,
            // The book's opening front page stays bare, TOC included.
            ItemKind::FrontMatter | ItemKind::Toc if self.physical_page == 1 => false,
            ItemKind::FrontMatter => true,
            ItemKind::PartDivider => !layout.suppress_page_numbers.on_part_dividers(),
            ItemKind::Work => {
                !self.is_first_page_of_item() || !layout.suppress_page_numbers.on_work_openings()
            }
            ItemKind::Toc | ItemKind::BackMatter => true,
        }
    }

    pub fn number_style(&self) -> NumberStyle {
        self.item.region.style()
    }

    pub fn region(&self) -> Region {
        self.item.region
    }

    pub fn is_recto(&self) -> bool {
        self.physical_page % 2 == 1
    }

    pub fn is_verso(&self) -> bool {
        !self.is_recto()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageMapping<'a> {
    pages: Vec<MappedPage<'a>>,
}

impl<'a> PageMapping<'a> {
    pub(crate) fn push_item(&mut self, item_index: usize, item: &'a ContentItem) {
        for page_in_item in 0..item.page_count {
            let output_index = self.pages.len();
            self.pages.push(MappedPage {
                physical_page: item.start_page + page_in_item,
                output_index,
                item_index,
                item,
                page_in_item,
            });
        }
    }

    pub fn pages(&self) -> &[MappedPage<'a>] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, output_index: usize) -> Option<&MappedPage<'a>> {
        self.pages.get(output_index)
    }

    pub fn by_physical_page(&self, physical_page: usize) -> Option<&MappedPage<'a>> {
        self.pages.iter().find(|p| p.physical_page == physical_page)
    }
}
