//! Text helpers shared by the extractor and the notifier.

use std::sync::LazyLock;

use regex::Regex;

static NON_ASCII_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\x00-\x7F]+").unwrap());
static PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([^\s\w]|_)+").unwrap());

/// Strip non-ASCII characters, then everything that is not alphanumeric or whitespace.
///
/// Destructive on purpose: `"$1,200.00"` becomes `"120000"`. Prices are not passed
/// through here for that reason.
pub fn clean_text(s: &str) -> String {
    let ascii = NON_ASCII_RE.replace_all(s, "");
    PUNCT_RE.replace_all(&ascii, "").into_owned()
}

/// Drop a trailing distance suffix such as `"Ottawa  - 3km"`.
///
/// When a `-` appears past the first character, keep what precedes it minus the two
/// characters right before the dash. A cut that would go below zero yields `""`
/// rather than counting back from the end, so `"a-b"` gives `""`, not `"a-"`.
pub fn strip_distance_suffix(raw: &str) -> &str {
    let Some(dash) = raw.chars().position(|c| c == '-') else {
        return raw;
    };
    if dash == 0 {
        return raw;
    }
    let keep = dash.saturating_sub(2);
    match raw.char_indices().nth(keep) {
        Some((byte_idx, _)) => &raw[..byte_idx],
        None => raw,
    }
}

/// Slice from the first `$` up to the first `.00`.
///
/// Known edge case: when either token is missing, or `.00` comes before `$`, the
/// result is empty. `"Please Contact"` and `"$1,200"` both give `""`.
pub fn slice_price(raw: &str) -> &str {
    match (raw.find('$'), raw.find(".00")) {
        (Some(start), Some(end)) if start <= end => &raw[start..end],
        _ => "",
    }
}

/// Case-insensitive substring match against a keyword list.
pub fn contains_any_keyword(title: &str, keywords: &[String]) -> bool {
    let lower = title.to_lowercase();
    keywords
        .iter()
        .filter(|kw| !kw.is_empty())
        .any(|kw| lower.contains(&kw.to_lowercase()))
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
