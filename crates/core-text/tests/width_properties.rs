//! Property tests for the character metrics table.

use core_text::{CharWidth, DEFAULT_SIZE, char_width, width::classify};
use proptest::prelude::*;
use unicode_normalization::UnicodeNormalization;

proptest! {
    #[test]
    fn widths_are_bounded(ch in any::<char>()) {
        if let Some(w) = char_width(ch) {
            prop_assert!(w >= 0.0);
            // Nothing is wider than `@`, slightly over one em.
            prop_assert!(w <= DEFAULT_SIZE * 1.02);
        }
    }

    // An accented Latin letter measures like its unaccented base.
    #[test]
    fn decomposed_matches_base(ch in "[àáâãäèéêëìíîïòóôõöùúûüñçÀÉÎÕÜÑÇ]") {
        let ch = ch.chars().next().unwrap();
        let base = ch.nfd().next().unwrap();
        prop_assert!(matches!(classify(ch), CharWidth::Decomposed(_)));
        prop_assert_eq!(char_width(ch), char_width(base));
    }
}
