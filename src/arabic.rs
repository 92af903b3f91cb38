//! Arabic script tables shared by the classifier, the resolver and the
//! behavior engine: letter-variant folding, the keyboard layout used for
//! typo simulation, and the stop-word list.

/// Fold Arabic letter variants to a canonical comparison form and lowercase
/// any Latin fallback characters. Keys of both name mappings are produced by
/// this function; it must stay stable across releases or persisted caches
/// stop matching.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'أ' | 'إ' | 'آ' => 'ا',
            'ى' => 'ي',
            'ة' => 'ه',
            'ؤ' => 'و',
            'ئ' => 'ء',
            'ک' => 'ك',
            _ => c,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Letters of the core Arabic alphabet (the ا-ي range). The classifier only
/// accepts tokens written entirely in these.
pub fn is_core_letter(c: char) -> bool {
    ('\u{0627}'..='\u{064A}').contains(&c)
}

/// Long vowels; everything else in the core range counts as a consonant for
/// the classifier's ratio heuristic.
pub fn is_long_vowel(c: char) -> bool {
    matches!(c, 'ا' | 'و' | 'ي')
}

/// Any codepoint in the Arabic script blocks, including presentation forms.
/// The extractor keeps these plus ASCII letters and whitespace.
pub fn is_arabic_script(c: char) -> bool {
    matches!(
        c,
        '\u{0600}'..='\u{06FF}'
            | '\u{0750}'..='\u{077F}'
            | '\u{08A0}'..='\u{08FF}'
            | '\u{FB50}'..='\u{FDFF}'
            | '\u{FE70}'..='\u{FEFF}'
    )
}

/// Three-row Arabic keyboard, physical order. Typo simulation replaces a
/// letter with one of its four orthogonal neighbors on this grid.
const KEYBOARD_ROWS: [&[char]; 3] = [
    &['ض', 'ص', 'ث', 'ق', 'ف', 'غ', 'ع', 'ه', 'خ', 'ح', 'ج'],
    &['ش', 'س', 'ي', 'ب', 'ل', 'ا', 'ت', 'ن', 'م', 'ك', 'ط'],
    &['ذ', 'ئ', 'ء', 'ؤ', 'ر', 'ى', 'ة', 'و', 'ز', 'ظ', 'د'],
];

fn key_position(c: char) -> Option<(usize, usize)> {
    for (r, row) in KEYBOARD_ROWS.iter().enumerate() {
        if let Some(col) = row.iter().position(|&k| k == c) {
            return Some((r, col));
        }
    }
    None
}

/// Orthogonally adjacent keys of `c`, empty when the character has no
/// position on the layout.
pub fn key_neighbors(c: char) -> Vec<char> {
    let Some((r, col)) = key_position(c) else {
        return Vec::new();
    };

    let mut neighbors = Vec::with_capacity(4);
    if col + 1 < KEYBOARD_ROWS[r].len() {
        neighbors.push(KEYBOARD_ROWS[r][col + 1]);
    }
    if col > 0 {
        neighbors.push(KEYBOARD_ROWS[r][col - 1]);
    }
    if r + 1 < KEYBOARD_ROWS.len() && col < KEYBOARD_ROWS[r + 1].len() {
        neighbors.push(KEYBOARD_ROWS[r + 1][col]);
    }
    if r > 0 && col < KEYBOARD_ROWS[r - 1].len() {
        neighbors.push(KEYBOARD_ROWS[r - 1][col]);
    }
    neighbors
}

/// Function words and fillers that are never names. Checked against the
/// normalized token.
const STOP_WORDS: &[&str] = &[
    // Arabic prepositions, demonstratives, question words
    "في", "من", "الى", "على", "عن", "كيف", "متى", "اين", "ماذا", "هذا", "هذه",
    "ذلك", "تلك", "التي", "الذي", "عند", "مع", "حول", "بين", "خلف", "امام",
    "فوق", "تحت", "داخل", "خارج", "قبل", "بعد", "خلال", "اثناء", "هنا", "هناك",
    "حيث", "لماذا", "اسم", "كذا", "كذلك", "ايضا",
    // English fallback fillers
    "the", "and", "or", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "into", "through", "during",
];

/// Substrings that drag a token's score down even when embedded in a longer
/// word (e.g. a demonstrative glued to a name by a missing space).
pub const STOP_WORD_PENALTY_SUBSTRINGS: &[&str] = &[
    "هذا", "هذه", "ذلك", "تلك", "التي", "الذي", "عند", "كيف", "متى", "اين",
    "ماذا", "اسم",
];

pub fn is_stop_word(normalized: &str) -> bool {
    STOP_WORDS.contains(&normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_variants_and_case() {
        assert_eq!(normalize("أحمد"), "احمد");
        assert_eq!(normalize("فتى"), "فتي");
        assert_eq!(normalize("حمزة"), "حمزه");
        assert_eq!(normalize("GOKU"), "goku");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("إسألني");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn key_neighbors_are_orthogonal() {
        // س sits at row 1, col 1: right ي, left ش, below ئ, above ص.
        let neighbors = key_neighbors('س');
        assert_eq!(neighbors, vec!['ي', 'ش', 'ئ', 'ص']);
    }

    #[test]
    fn key_neighbors_of_unmapped_char_is_empty() {
        assert!(key_neighbors('x').is_empty());
        assert!(key_neighbors(' ').is_empty());
    }

    #[test]
    fn corner_key_has_two_neighbors() {
        let neighbors = key_neighbors('ض');
        assert_eq!(neighbors, vec!['ص', 'ش']);
    }

    #[test]
    fn stop_words_cover_both_scripts() {
        assert!(is_stop_word("في"));
        assert!(is_stop_word("the"));
        assert!(!is_stop_word("غوكو"));
    }
}
