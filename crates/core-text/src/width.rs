//! Character Metrics Table
//!
//! Approximate advance widths for the overlay's default proportional font,
//! expressed in font units (1000 per em) and converted to pixels at
//! `DEFAULT_SIZE`. The parser scales the result by the active size; this module
//! knows nothing about tags.
//!
//! Width Precedence Order:
//! 1. Printable ASCII table (`ASCII_UNITS`).
//! 2. Explicit zero-width format characters (ZWSP, ZWNJ, ZWJ, word joiner, BOM).
//! 3. Canonical decomposition: a precomposed Latin letter takes the width of
//!    its ASCII base (`é` -> `e`).
//! 4. East Asian wide / fullwidth characters occupy one full em.
//! 5. Unknown: no width. Callers decide how to recover (the parser treats the
//!    character as zero width and logs it).
//!
//! Invariants:
//! - The table covers every code point in `' '..='~'`; lookups never index
//!   out of range.
//! - Pure data, no state; safe to call from any thread.

use unicode_normalization::char::decompose_canonical;

use crate::{DEFAULT_SIZE, ZERO_WIDTH_SPACE};

/// Font units per em for `ASCII_UNITS`.
const UNITS_PER_EM: f32 = 1000.0;

/// Advance widths for `' '` (0x20) through `'~'` (0x7E), in font units.
static ASCII_UNITS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, // space ! " # $ % & '
    333, 333, 389, 584, 278, 333, 278, 278, // ( ) * + , - . /
    556, 556, 556, 556, 556, 556, 556, 556, // 0-7
    556, 556, 278, 278, 584, 584, 584, 556, // 8 9 : ; < = > ?
    1015, 667, 667, 722, 722, 667, 611, 778, // @ A-G
    722, 278, 500, 667, 556, 833, 722, 778, // H-O
    667, 778, 722, 667, 611, 722, 667, 944, // P-W
    667, 667, 611, 278, 278, 278, 469, 556, // X Y Z [ \ ] ^ _
    333, 556, 556, 500, 556, 556, 278, 556, // ` a-g
    556, 222, 222, 500, 222, 833, 556, 556, // h-o
    556, 556, 333, 500, 278, 556, 500, 722, // p-w
    500, 500, 500, 334, 260, 334, 584, // x y z { | } ~
];

/// How a character's width was resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CharWidth {
    /// Listed in the ASCII table.
    Table(u16),
    /// Format character with no advance.
    ZeroWidth,
    /// Width borrowed from the ASCII base of a canonical decomposition.
    Decomposed(u16),
    /// East Asian wide / fullwidth glyph.
    Wide,
    /// Not covered by the table.
    Unknown,
}

impl CharWidth {
    /// Width in font units, `None` for unknown characters.
    pub fn units(self) -> Option<u16> {
        match self {
            CharWidth::Table(u) | CharWidth::Decomposed(u) => Some(u),
            CharWidth::ZeroWidth => Some(0),
            CharWidth::Wide => Some(UNITS_PER_EM as u16),
            CharWidth::Unknown => None,
        }
    }
}

fn ascii_units(ch: char) -> Option<u16> {
    if (' '..='~').contains(&ch) {
        Some(ASCII_UNITS[ch as usize - 0x20])
    } else {
        None
    }
}

fn is_zero_width(ch: char) -> bool {
    matches!(
        ch,
        ZERO_WIDTH_SPACE | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'
    )
}

fn decomposed_base_units(ch: char) -> Option<u16> {
    let mut base = None;
    decompose_canonical(ch, |c| {
        if base.is_none() {
            base = Some(c);
        }
    });
    match base {
        Some(b) if b != ch => ascii_units(b),
        _ => None,
    }
}

/// Resolve a character against the metrics table.
pub fn classify(ch: char) -> CharWidth {
    if let Some(u) = ascii_units(ch) {
        return CharWidth::Table(u);
    }
    if is_zero_width(ch) {
        return CharWidth::ZeroWidth;
    }
    if let Some(u) = decomposed_base_units(ch) {
        return CharWidth::Decomposed(u);
    }
    if unicode_width::UnicodeWidthChar::width(ch) == Some(2) {
        return CharWidth::Wide;
    }
    tracing::trace!(target: "text.width", ch = %ch.escape_unicode(), "width_table_miss");
    CharWidth::Unknown
}

/// Width of `ch` in font units, `None` when unknown.
#[inline]
pub fn char_width_units(ch: char) -> Option<u16> {
    classify(ch).units()
}

/// Width of `ch` in pixels at `DEFAULT_SIZE`, `None` when unknown.
#[inline]
pub fn char_width(ch: char) -> Option<f32> {
    char_width_units(ch).map(|u| f32::from(u) * DEFAULT_SIZE / UNITS_PER_EM)
}
