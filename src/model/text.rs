//! Text normalization shared by conversations and messages

/// Maximum characters kept in a timeline preview
pub const PREVIEW_CHARS: usize = 100;

/// Kana and common CJK ideograph ranges kept verbatim
const PRESERVED_RANGES: &[(char, char)] = &[
    ('\u{3040}', '\u{309F}'), // hiragana
    ('\u{30A0}', '\u{30FF}'), // katakana
    ('\u{4E00}', '\u{9FAF}'), // CJK unified ideographs
];

fn is_preserved(c: char) -> bool {
    c.is_alphanumeric()
        || PRESERVED_RANGES
            .iter()
            .any(|(lo, hi)| (*lo..=*hi).contains(&c))
}

/// Build the searchable form of `text`.
///
/// Lower-cases, turns every character outside the preserved alphabet into a
/// space and collapses runs of whitespace.
pub fn normalize_search_text(text: &str) -> String {
    let replaced: String = text
        .to_lowercase()
        .chars()
        .map(|c| if is_preserved(c) { c } else { ' ' })
        .collect();

    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether `c` may appear in normalized text
pub fn is_searchable_char(c: char) -> bool {
    c == ' ' || is_preserved(c)
}

/// Shorten `content` for timeline previews
pub fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let head: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}
