/// Per-page figures collected while writing the PDF.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetrics {
    pub page_number: usize,
    pub render_ms: f64,
    pub command_count: usize,
    pub text_count: usize,
    pub content_bytes: usize,
    pub unencodable_chars: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMetrics {
    pub pages: Vec<PageMetrics>,
    pub total_render_ms: f64,
    pub total_bytes: usize,
}

impl DocumentMetrics {
    pub fn total_content_bytes(&self) -> usize {
        self.pages.iter().map(|page| page.content_bytes).sum()
    }
}
