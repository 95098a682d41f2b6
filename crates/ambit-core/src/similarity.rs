// Title similarity for duplicate-job suppression
//
// Two signals over normalized titles: substring containment (shorter form
// length >= 4) and character-bigram Jaccard against a configurable threshold.
// Normalization strips digits, punctuation, whitespace, parenthesised
// qualifiers and a small stopword set.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Default bigram Jaccard threshold
pub const DEFAULT_TITLE_SIMILARITY_THRESHOLD: f64 = 0.5;

const STOPWORDS: [&str; 3] = ["the", "a", "an"];

fn paren_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[（(][^）)]*[）)]").expect("valid regex"))
}

/// Normalize a title: lowercase, drop parenthesised qualifiers, stopwords,
/// digits, punctuation and whitespace.
pub fn normalize_title(text: &str) -> String {
    let without_parens = paren_pattern().replace_all(text, "");
    let lowered = without_parens.to_lowercase();

    let mut kept_words: Vec<String> = Vec::new();
    for word in lowered.split_whitespace() {
        let cleaned: String = word
            .chars()
            .filter(|c| c.is_alphabetic())
            .collect();
        if cleaned.is_empty() || STOPWORDS.contains(&cleaned.as_str()) {
            continue;
        }
        kept_words.push(cleaned);
    }
    kept_words.concat()
}

fn bigrams(normalized: &str) -> HashSet<String> {
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return HashSet::new();
    }
    if chars.len() < 2 {
        return HashSet::from([normalized.to_string()]);
    }
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

/// Character-bigram Jaccard similarity of two normalized titles
pub fn bigram_jaccard(a: &str, b: &str) -> f64 {
    let ga = bigrams(&normalize_title(a));
    let gb = bigrams(&normalize_title(b));
    if ga.is_empty() || gb.is_empty() {
        return 0.0;
    }
    let intersection = ga.intersection(&gb).count();
    let union = ga.union(&gb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// True when one normalized title contains the other (shorter length >= 4)
pub fn containment_match(a: &str, b: &str) -> bool {
    let na = normalize_title(a);
    let nb = normalize_title(b);
    if na.chars().count() < 4 || nb.chars().count() < 4 {
        return false;
    }
    let (shorter, longer) = if na.chars().count() <= nb.chars().count() {
        (&na, &nb)
    } else {
        (&nb, &na)
    };
    longer.contains(shorter.as_str())
}

/// Combined duplicate signal
pub fn titles_similar(a: &str, b: &str, threshold: f64) -> bool {
    if containment_match(a, b) {
        return true;
    }
    bigram_jaccard(a, b) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_noise() {
        assert_eq!(
            normalize_title("Follow up with Alice (2nd attempt)"),
            "followupwithalice"
        );
        assert_eq!(normalize_title("Send the report #3!"), "sendreport");
    }

    #[test]
    fn scenario_bigram_overlap_clears_threshold() {
        let score = bigram_jaccard("Follow up with Alice", "Continue following up with Alice");
        assert!(score >= 0.5, "score was {score}");
    }

    #[test]
    fn follow_up_variants_are_duplicates() {
        assert!(titles_similar(
            "Follow up with Alice",
            "Continue following up with Alice",
            DEFAULT_TITLE_SIMILARITY_THRESHOLD
        ));
    }

    #[test]
    fn containment_requires_minimum_length() {
        // "go" is inside "golang" but too short to count
        assert!(!containment_match("go", "golang weekly digest"));
        assert!(containment_match(
            "competitor research",
            "competitor research report for Q3"
        ));
    }

    #[test]
    fn unrelated_titles_pass() {
        assert!(!titles_similar(
            "Research the top 3 competitors",
            "Book a dentist appointment",
            DEFAULT_TITLE_SIMILARITY_THRESHOLD
        ));
    }

    #[test]
    fn jaccard_is_symmetric_and_bounded() {
        let a = "Weekly sales digest";
        let b = "Weekly sales summary";
        let s1 = bigram_jaccard(a, b);
        let s2 = bigram_jaccard(b, a);
        assert!((s1 - s2).abs() < f64::EPSILON);
        assert!((0.0..=1.0).contains(&s1));
    }
}
