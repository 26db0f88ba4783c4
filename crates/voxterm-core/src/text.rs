//! Text preparation — utterance folding before dispatch and reply cleanup
//! before speech.
//!
//! Pure functions, no I/O.

use regex::Regex;
use std::sync::LazyLock;

// Compiled on first use.
static RE_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static RE_DANGLING_DASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)-+|-+(\s|$)").unwrap());
static RE_MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());
static RE_EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*{1,2}([^*]+)\*{1,2}").unwrap());
static RE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());

/// Case-fold a phrase or utterance.
///
/// Lowercases and maps `ё` to `е`, which recognizers emit inconsistently.
pub fn fold(text: &str) -> String {
    text.to_lowercase().replace('ё', "е")
}

/// Normalize raw recognizer output into the form trigger phrases are
/// compared against: folded, punctuation stripped, whitespace collapsed.
///
/// Hyphens inside words survive (`кто-нибудь`), dangling ones do not.
pub fn normalize_utterance(text: &str) -> String {
    let mut c = fold(text);
    c = RE_PUNCT.replace_all(&c, " ").into_owned();
    c = RE_DANGLING_DASH.replace_all(&c, " ").into_owned();
    c = RE_MULTI_SPACE.replace_all(&c, " ").into_owned();
    c.trim().to_string()
}

/// Strip the bits of markup remote servers like to put into replies so the
/// text reads naturally when spoken.
pub fn clean_reply(text: &str) -> String {
    let mut c = RE_LINK.replace_all(text, "$1").into_owned();
    c = RE_EMPHASIS.replace_all(&c, "$1").into_owned();
    c = RE_MULTI_SPACE.replace_all(&c, " ").into_owned();
    c.trim().to_string()
}

/// Whether a reply carries anything a synthesizer can pronounce.
pub fn is_speakable(text: &str) -> bool {
    text.chars().any(|c| c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_and_yo() {
        assert_eq!(fold("ЁЛКА Громкость"), "елка громкость");
    }

    #[test]
    fn strips_punctuation() {
        assert_eq!(normalize_utterance("Громкость, музыки!"), "громкость музыки");
    }

    #[test]
    fn keeps_inner_hyphens() {
        assert_eq!(normalize_utterance("Скажи что-нибудь - пожалуйста"), "скажи что-нибудь пожалуйста");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize_utterance("  привет    мир \n"), "привет мир");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(normalize_utterance("?!..."), "");
    }

    #[test]
    fn cleans_reply_markup() {
        assert_eq!(
            clean_reply("see **this** [page](https://example.com)  now"),
            "see this page now"
        );
    }

    #[test]
    fn speakable_needs_alphanumerics() {
        assert!(is_speakable("ok"));
        assert!(!is_speakable("..."));
    }
}
