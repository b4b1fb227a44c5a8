//! Script-based language detection.
//!
//! News text in this domain is dominated by one script per article, so
//! counting letters per Unicode block is enough to tell Bengali from
//! English from Hindi or Arabic.

/// Share of letters a script needs before it is reported.
const DOMINANCE: f64 = 0.5;

/// Minimum letters needed to make a call at all.
const MIN_LETTERS: usize = 20;

#[derive(Debug, Default)]
struct ScriptCounts {
    bengali: usize,
    devanagari: usize,
    arabic: usize,
    latin: usize,
    other: usize,
}

impl ScriptCounts {
    fn tally(text: &str) -> Self {
        let mut counts = Self::default();
        for c in text.chars().filter(|c| c.is_alphabetic()) {
            match c as u32 {
                0x0980..=0x09FF => counts.bengali += 1,
                0x0900..=0x097F => counts.devanagari += 1,
                0x0600..=0x06FF | 0x0750..=0x077F => counts.arabic += 1,
                _ if c.is_ascii_alphabetic() => counts.latin += 1,
                0x00C0..=0x024F => counts.latin += 1,
                _ => counts.other += 1,
            }
        }
        counts
    }

    fn total(&self) -> usize {
        self.bengali + self.devanagari + self.arabic + self.latin + self.other
    }
}

/// ISO 639-1 code of the dominant script, if any.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let counts = ScriptCounts::tally(text);
    let total = counts.total();
    if total < MIN_LETTERS {
        return None;
    }

    [
        ("bn", counts.bengali),
        ("hi", counts.devanagari),
        ("ar", counts.arabic),
        ("en", counts.latin),
    ]
    .into_iter()
    .max_by_key(|(_, n)| *n)
    .filter(|(_, n)| *n as f64 / total as f64 >= DOMINANCE)
    .map(|(code, _)| code)
}

/// Compare language codes on their primary subtag (`bn-BD` matches `bn`).
pub fn same_language(expected: &str, detected: &str) -> bool {
    fn primary(code: &str) -> String {
        code.split(['-', '_'])
            .next()
            .unwrap_or(code)
            .to_ascii_lowercase()
    }
    primary(expected) == primary(detected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_scripts() {
        assert_eq!(
            detect_language("এই নিবন্ধটি বাংলায় লেখা হয়েছে। এটি একটি পরীক্ষা।"),
            Some("bn")
        );
        assert_eq!(
            detect_language("The river rose above the danger mark on Tuesday."),
            Some("en")
        );
        assert_eq!(detect_language("यह एक परीक्षण वाक्य है जो हिंदी में लिखा गया है"), Some("hi"));
        assert_eq!(detect_language("short"), None);
    }

    #[test]
    fn test_mixed_text_uses_majority() {
        let text = "ঢাকায় আজ বৃষ্টি হয়েছে এবং তাপমাত্রা কমেছে (Dhaka)";
        assert_eq!(detect_language(text), Some("bn"));
    }

    #[test]
    fn test_same_language() {
        assert!(same_language("bn-BD", "bn"));
        assert!(same_language("EN", "en"));
        assert!(!same_language("bn", "en"));
    }
}
