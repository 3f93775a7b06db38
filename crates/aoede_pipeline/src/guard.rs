//! Soft output censor, the last stage before text leaves the pipeline.
//!
//! Masks rather than rejects: profanity becomes `***`, emails and phone
//! numbers become placeholders. Pure and idempotent, so running a reply
//! through twice changes nothing.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")
        .expect("email regex is valid")
});

static RE_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\d[\d\s\-()]{6,}\d").expect("phone regex is valid")
});

/// Words masked out of the box; the config may extend the list.
const BUILTIN_PROFANITY: &[&str] = &["damn", "hell", "crap", "shit", "fuck", "bastard"];

const EMAIL_MASK: &str = "[email hidden]";
const PHONE_MASK: &str = "[number hidden]";
const WORD_MASK: &str = "***";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterHits {
    pub profanity: usize,
    pub pii: usize,
}

pub struct OutputFilter {
    profanity: Regex,
}

impl OutputFilter {
    pub fn new(extra_words: &[String]) -> Self {
        let mut words: Vec<String> = BUILTIN_PROFANITY
            .iter()
            .map(|w| regex::escape(w))
            .collect();
        words.extend(
            extra_words
                .iter()
                .filter(|w| !w.trim().is_empty())
                .map(|w| regex::escape(w.trim())),
        );
        let pattern = format!(r"(?i)\b(?:{})\b", words.join("|"));
        Self {
            profanity: Regex::new(&pattern).expect("profanity regex is valid"),
        }
    }

    /// Mask the text, returning the filtered copy and hit counts by
    /// category. Emails are masked before phones so a numeric local part
    /// cannot double-count.
    pub fn apply(&self, text: &str) -> (String, FilterHits) {
        let mut hits = FilterHits::default();

        let email_count = RE_EMAIL.find_iter(text).count();
        let after_email = RE_EMAIL.replace_all(text, EMAIL_MASK);

        let phone_count = RE_PHONE.find_iter(&after_email).count();
        let after_phone = RE_PHONE.replace_all(&after_email, PHONE_MASK);

        let profanity_count = self.profanity.find_iter(&after_phone).count();
        let filtered = self.profanity.replace_all(&after_phone, WORD_MASK);

        hits.pii = email_count + phone_count;
        hits.profanity = profanity_count;
        (filtered.into_owned(), hits)
    }
}

impl Default for OutputFilter {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_profanity_and_email() {
        let filter = OutputFilter::default();
        let (out, hits) = filter.apply("damn, mail me at test@example.com ok?");
        assert_eq!(hits.profanity, 1);
        assert_eq!(hits.pii, 1);
        assert!(!out.contains("test@example.com"));
        assert!(out.contains("***"));
        assert!(out.contains("[email hidden]"));
    }

    #[test]
    fn test_masks_phone_numbers() {
        let filter = OutputFilter::default();
        let (out, hits) = filter.apply("reach me at +7 999 123 45 67 tonight");
        assert_eq!(hits.pii, 1);
        assert!(out.contains("[number hidden]"));
        assert!(!out.contains("999"));
    }

    #[test]
    fn test_idempotent() {
        let filter = OutputFilter::default();
        let (once, first_hits) = filter.apply("what the hell, call +12025550199 or a@b.io");
        let (twice, second_hits) = filter.apply(&once);
        assert_eq!(once, twice);
        assert!(first_hits.profanity >= 1 && first_hits.pii >= 2);
        assert_eq!(second_hits, FilterHits::default());
    }

    #[test]
    fn test_word_boundaries_spare_containing_words() {
        let filter = OutputFilter::default();
        let (out, hits) = filter.apply("hello, that shellfish was scrappy");
        assert_eq!(hits.profanity, 0);
        assert_eq!(out, "hello, that shellfish was scrappy");
    }

    #[test]
    fn test_case_insensitive_profanity() {
        let filter = OutputFilter::default();
        let (out, hits) = filter.apply("DAMN that's loud");
        assert_eq!(hits.profanity, 1);
        assert!(out.starts_with("***"));
    }

    #[test]
    fn test_config_extends_the_word_list() {
        let filter = OutputFilter::new(&["frak".to_string()]);
        let (out, hits) = filter.apply("frak this toaster");
        assert_eq!(hits.profanity, 1);
        assert!(out.contains("***"));
    }

    #[test]
    fn test_clean_text_untouched() {
        let filter = OutputFilter::default();
        let input = "see you tomorrow at the park";
        let (out, hits) = filter.apply(input);
        assert_eq!(out, input);
        assert_eq!(hits, FilterHits::default());
    }

    #[test]
    fn test_short_digit_runs_are_not_phones() {
        let filter = OutputFilter::default();
        let (out, hits) = filter.apply("the year 2026 and room 404");
        assert_eq!(hits.pii, 0);
        assert_eq!(out, "the year 2026 and room 404");
    }
}
