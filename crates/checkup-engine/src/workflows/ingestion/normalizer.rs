/// Canonical form for header and parameter-name comparison.
///
/// Strips byte-order marks and zero-width characters that spreadsheet exports
/// leave behind, collapses runs of whitespace and lowercases ASCII.
pub fn normalize_header(value: &str) -> String {
    let cleaned = value
        .replace(['\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}'], "")
        .replace('\u{a0}', " ");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_ascii_lowercase()
}
