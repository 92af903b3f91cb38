//! Heuristic token classifier for strict mode.
//!
//! Scores a normalized token on how much it looks like a transliterated
//! character name. This is a tuned heuristic, not a guarantee: false
//! positives and negatives are expected. What is guaranteed is determinism —
//! the same input always produces the same verdict.

use crate::arabic;

const ACCEPT_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub accepted: bool,
    pub confidence: f32,
}

impl Classification {
    fn rejected() -> Self {
        Self {
            accepted: false,
            confidence: 0.0,
        }
    }
}

/// Name endings typical of Japanese names rendered in Arabic script.
const NAME_ENDINGS: &[&str] = &["كو", "كي", "تو", "رو", "مي", "ري"];

/// Syllables common anywhere in such names.
const NAME_SYLLABLES: &[&str] = &["سا", "نا", "يو", "شي"];

/// Classify a normalized token. Callers are expected to pass the output of
/// [`arabic::normalize`]; raw text with unfolded variants will score lower
/// than it should.
pub fn classify(normalized: &str) -> Classification {
    let chars: Vec<char> = normalized.chars().collect();
    let len = chars.len();

    if len == 0 || !chars.iter().all(|&c| arabic::is_core_letter(c)) {
        return Classification::rejected();
    }
    if arabic::is_stop_word(normalized) {
        return Classification::rejected();
    }
    if !(4..=10).contains(&len) {
        return Classification::rejected();
    }

    let mut score = 0.0f32;

    if NAME_ENDINGS.iter().any(|e| normalized.ends_with(e))
        || NAME_SYLLABLES.iter().any(|s| normalized.contains(s))
    {
        score += 0.7;
    }

    if (4..=8).contains(&len) {
        // Name-shaped: pure alphabet in the typical transliteration length.
        score += 1.0;
    }

    if matches!(chars[len - 1], 'ه' | 'ة' | 'ي' | 'و' | 'ا') {
        score += 0.6;
    }

    let vowels = chars.iter().filter(|&&c| arabic::is_long_vowel(c)).count();
    let consonant_ratio = (len - vowels) as f32 / len as f32;
    if (0.4..=0.7).contains(&consonant_ratio) {
        score += 0.4;
    }

    if chars.windows(3).any(|w| w[0] == w[1] && w[1] == w[2]) {
        score -= 0.5;
    }

    if arabic::STOP_WORD_PENALTY_SUBSTRINGS
        .iter()
        .any(|s| normalized.contains(s))
    {
        score -= 0.8;
    }

    if (4..=6).contains(&len) {
        score += 0.3;
    }

    let confidence = score.clamp(0.0, 1.0);
    Classification {
        accepted: confidence > ACCEPT_THRESHOLD,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arabic::normalize;

    #[test]
    fn classification_is_deterministic() {
        let a = classify(&normalize("غوكو"));
        let b = classify(&normalize("غوكو"));
        assert_eq!(a, b);
    }

    #[test]
    fn accepts_typical_character_names() {
        for name in ["غوكو", "ناروتو", "ساسكي", "كيلوا"] {
            let c = classify(&normalize(name));
            assert!(c.accepted, "{name} should classify as a name: {c:?}");
        }
    }

    #[test]
    fn rejects_stop_words_and_digits() {
        assert!(!classify("1234").accepted);
        assert!(!classify("هناك").accepted);
        assert!(!classify(&normalize("الى")).accepted);
    }

    #[test]
    fn rejects_length_outside_band() {
        assert!(!classify("ابو").accepted); // 3 letters
        assert!(!classify("ابجدهوزحطيكلم").accepted); // 13 letters
    }

    #[test]
    fn rejects_mixed_script_tokens() {
        assert!(!classify("gokuغوكو").accepted);
        assert!(!classify("goku").accepted);
    }

    #[test]
    fn penalizes_tripled_letters() {
        // Same length and alphabet; only the tripled run differs.
        let plain = classify("بتبتبتت");
        let tripled = classify("بببتبتت");
        assert!(plain.accepted);
        assert!(!tripled.accepted);
        assert!(tripled.confidence < plain.confidence);
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        for token in ["غوكو", "ناروتو", "هذاهذا", "بنبنبنبنبن"] {
            let c = classify(&normalize(token));
            assert!((0.0..=1.0).contains(&c.confidence), "{token}: {c:?}");
        }
    }
}
