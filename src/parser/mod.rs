pub mod detail;
pub mod list;
pub mod normalize;

use scraper::ElementRef;

/// Element text with each text node trimmed and concatenated.
pub(crate) fn text_of(el: &ElementRef) -> String {
    el.text().map(str::trim).collect()
}

/// Element text as trimmed, non-empty lines joined with newlines.
pub(crate) fn text_lines(el: &ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
