use std::sync::LazyLock;

use regex::Regex;

static LOWER_UPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-zа-яё])([A-ZА-ЯЁ])").unwrap());
static LETTER_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-zA-Zа-яёА-ЯЁ])(\d)").unwrap());
static DIGIT_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)([a-zA-Zа-яёА-ЯЁ])").unwrap());
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Zа-яёА-ЯЁ0-9_]").unwrap());

/// Convert any string to `snake_case`.
///
/// Underscores are inserted at case and letter/digit boundaries, everything
/// outside the Latin/Cyrillic alphanumeric set becomes an underscore, and the
/// result is lowercased. The conversion is idempotent.
pub fn to_snake_case(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let step = LOWER_UPPER.replace_all(trimmed, "${1}_${2}");
    let step = LETTER_DIGIT.replace_all(&step, "${1}_${2}");
    let step = DIGIT_LETTER.replace_all(&step, "${1}_${2}");
    let step = NON_WORD.replace_all(&step, "_");
    step.to_lowercase()
}

/// Strip emoji and pictographs that the sink schema cannot store.
pub fn string_normalize(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !matches!(
                *c as u32,
                0x1F600..=0x1F64F // emoticons
                    | 0x1F300..=0x1F5FF // symbols & pictographs
                    | 0x1F680..=0x1F6FF // transport & map symbols
                    | 0x1F1E0..=0x1F1FF // flags
            )
        })
        .collect()
}
