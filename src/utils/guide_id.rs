//! Guide identifier normalization for playlist/EPG matching
//!
//! Playlists and guides are maintained by different people, so the same
//! channel shows up as `Rai1.it`, `rai 1.it` or `RAI1 HD`. Matching happens on
//! normalized keys rather than raw strings.

use regex::Regex;
use std::sync::OnceLock;

/// Quality and transport tags that do not identify a channel
const NAME_NOISE_PATTERNS: &[&str] = &[
    r"(?i)\b4K\b",
    r"(?i)\bFHD\b",
    r"(?i)\bHD\b",
    r"(?i)\bSD\b",
    r"(?i)\bHEVC\b",
    r"(?i)\bH\.?265\b",
    r"(?i)\b720P?\b",
    r"(?i)\b1080P?\b",
    r"(?i)\bUHD\b",
    r"(?i)\((SAT|CABLE|IPTV|BACKUP)\)",
];

fn noise_regex() -> &'static [Regex] {
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        NAME_NOISE_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// Normalize a guide identifier: lowercase, alphanumerics only.
pub fn normalize_guide_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Normalize a display name for fallback matching, dropping quality tags first.
pub fn normalize_channel_name(name: &str) -> String {
    let mut cleaned = name.to_string();
    for re in noise_regex() {
        cleaned = re.replace_all(&cleaned, " ").into_owned();
    }
    let normalized = normalize_guide_id(&cleaned);
    if normalized.is_empty() {
        // A name made only of tags still deserves a key
        normalize_guide_id(name)
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Rai1.it", "rai1it")]
    #[case(" rai 1.IT ", "rai1it")]
    #[case("BBC-One_HD", "bbconehd")]
    #[case("Das Erste", "daserste")]
    #[case("", "")]
    fn test_normalize_guide_id(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_guide_id(input), expected);
    }

    #[rstest]
    #[case("Rai 1 HD", "rai1")]
    #[case("RAI 1 (SAT)", "rai1")]
    #[case("Sky Sport 4K", "skysport")]
    #[case("HD", "hd")]
    fn test_normalize_channel_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_channel_name(input), expected);
    }
}
