use regex::Regex;

fn asset_reference_ignores() -> &'static [Regex] {
    use std::sync::OnceLock;

    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            vec![
                Regex::new(r"(?i)^https?://").expect("invalid http(s) regex"),
                Regex::new(r"^//").expect("invalid protocol-relative regex"),
                Regex::new(r"(?i)^data:").expect("invalid data URI regex"),
                Regex::new(r"(?i)^mailto:").expect("invalid mailto regex"),
                Regex::new(r"^#").expect("invalid fragment regex"),
            ]
        })
        .as_slice()
}

/// Determine whether an asset reference points outside the source roots.
///
/// External URLs, data URIs and fragment-only references have no file behind them, so the
/// pipeline leaves them exactly as written.
pub fn should_ignore_asset_reference(value: &str) -> bool {
    let value = value.trim();
    value.is_empty()
        || asset_reference_ignores()
            .iter()
            .any(|pattern| pattern.is_match(value))
}
