// src/normalize.rs

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Builds the deterministic household identity key `LASTNAME|FIRSTNAME|ZIP`.
///
/// Upload sources vary in encoding, punctuation and casing, so both name
/// fields are NFD-decomposed, stripped of combining marks, uppercased and
/// reduced to ASCII letters; the zip is reduced to digits. Total function:
/// empty or malformed input maps to empty segments, never an error.
pub fn household_key(first_name: &str, last_name: &str, postal_code: &str) -> String {
    format!(
        "{}|{}|{}",
        alpha_upper(last_name),
        alpha_upper(first_name),
        digits(postal_code)
    )
}

/// Uppercase ASCII name tokens for fuzzy producer matching: diacritics
/// stripped, split on whitespace, punctuation dropped, empties removed.
pub fn name_tokens(name: &str) -> Vec<String> {
    name.split_whitespace()
        .map(alpha_numeric_upper)
        .filter(|t| !t.is_empty())
        .collect()
}

fn strip_diacritics(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

fn alpha_upper(s: &str) -> String {
    strip_diacritics(s)
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect()
}

fn alpha_numeric_upper(s: &str) -> String {
    strip_diacritics(s)
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_across_diacritics_and_punctuation() {
        assert_eq!(
            household_key("José", "O'Brien", "90210"),
            household_key("JOSE", "OBRIEN", "90210")
        );
        assert_eq!(household_key("José", "O'Brien", "90210"), "OBRIEN|JOSE|90210");
    }

    #[test]
    fn key_is_total_on_empty_input() {
        assert_eq!(household_key("", "", ""), "||");
    }

    #[test]
    fn zip_keeps_digits_only() {
        assert_eq!(household_key("Jane", "Doe", "10001-2345"), "DOE|JANE|100012345");
        assert_eq!(household_key("Jane", "Doe", "N/A"), "DOE|JANE|");
    }

    #[test]
    fn name_ordering_and_case_do_not_leak_into_key() {
        assert_eq!(
            household_key("jane", "DOE", "10001"),
            household_key("Jane", "Doe", "10001")
        );
    }

    #[test]
    fn tokens_are_uppercase_ascii_without_punctuation() {
        assert_eq!(name_tokens("J. Smíth"), vec!["J", "SMITH"]);
        assert_eq!(name_tokens("  "), Vec::<String>::new());
        assert_eq!(name_tokens("Mary-Anne Lee"), vec!["MARYANNE", "LEE"]);
    }
}
