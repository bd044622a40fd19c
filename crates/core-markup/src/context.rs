//! Parse Context: the mutable state threaded through a single parse call.
//!
//! One context is created per `Parser::parse` call and dropped (or returned to
//! the caller for inspection) at the end; nothing survives between calls. Tag
//! handlers receive it by `&mut` and are the only code besides the parser that
//! mutates it.
//!
//! Invariants:
//! - `size_stack` holds the sizes active before each still-open size tag.
//! - Every opening scoped tag pushes exactly one entry onto `pending_closers`;
//!   its closing handler removes the most recent matching entry.
//! - `close_pending` applies whatever is left, in registration order, so the
//!   emitted markup is balanced even when the source was not.

use bitflags::bitflags;
use core_text::{LayoutMetrics, ZERO_WIDTH_SPACE, char_width};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::debug;

use crate::tags::{RichTextTag, TagKind};

/// Width multiplier for super/subscript glyphs.
pub const SCRIPT_WIDTH_RATIO: f32 = 0.5;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct TextFlags: u8 {
        const BOLD = 1;
        const NO_BREAK = 1 << 1;
        const SUPERSCRIPT = 1 << 2;
        const SUBSCRIPT = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum CaseStyle {
    #[default]
    Normal,
    Upper,
    Lower,
    SmallCaps,
}

/// Why a line ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineBreak {
    /// `\n` in the source or a `<br>` tag.
    Explicit,
    /// The line overflowed the functional width. `last` is the width of the
    /// character that overflowed it.
    Wrap { last: f32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseContext {
    #[serde(skip)]
    pub metrics: LayoutMetrics,
    /// Current font size (px).
    pub size: f32,
    pub size_stack: SmallVec<[f32; 4]>,
    /// Explicit `<line-height>` value; `None` derives the height from `size`.
    pub line_height_override: Option<f32>,
    pub indent: f32,
    pub line_indent: f32,
    /// `true` until the current line was produced by a wrap.
    pub paragraph_start: bool,
    pub width_since_space: f32,
    pub line_width: f32,
    pub case: CaseStyle,
    pub flags: TextFlags,
    /// Monospace advance (px) while inside `<mspace>`.
    pub monospace: Option<f32>,
    /// Extra advance added to every character (`<cspace>`).
    pub spacing: f32,
    pub should_parse: bool,
    pub pending_closers: Vec<TagKind>,
    pub output: String,
    /// Literal text only (no markup), collected when requested.
    pub plain: Option<String>,
    /// Sum of the line height of every line break so far.
    pub offset: f32,
}

impl ParseContext {
    pub fn new(metrics: LayoutMetrics) -> Self {
        Self {
            metrics,
            size: metrics.default_size,
            size_stack: SmallVec::new(),
            line_height_override: None,
            indent: 0.0,
            line_indent: 0.0,
            paragraph_start: true,
            width_since_space: 0.0,
            line_width: 0.0,
            case: CaseStyle::Normal,
            flags: TextFlags::empty(),
            monospace: None,
            spacing: 0.0,
            should_parse: true,
            pending_closers: Vec::new(),
            output: String::new(),
            plain: None,
            offset: 0.0,
        }
    }

    /// Line height that the next line break will consume.
    pub fn line_height(&self) -> f32 {
        self.line_height_override
            .unwrap_or_else(|| self.metrics.line_height_for_size(self.size))
    }

    /// Horizontal room on the current line before the renderer wraps.
    pub fn functional_width(&self) -> f32 {
        let line_indent = if self.paragraph_start {
            self.line_indent
        } else {
            0.0
        };
        (self.metrics.display_width - self.indent - line_indent).max(0.0)
    }

    pub fn push_str(&mut self, markup: &str) {
        self.output.push_str(markup);
    }

    pub fn push_closer(&mut self, closer: TagKind) {
        self.pending_closers.push(closer);
    }

    /// Drop the most recently registered obligation for `closer`, if any.
    pub fn remove_closer(&mut self, closer: TagKind) {
        if let Some(pos) = self.pending_closers.iter().rposition(|c| *c == closer) {
            self.pending_closers.remove(pos);
        }
    }

    /// Apply every outstanding closing obligation in registration order.
    pub fn close_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending_closers);
        for closer in pending {
            closer.handle(self, "");
        }
    }

    /// Emit a literal character and account for its width.
    pub fn push_char(&mut self, ch: char) {
        self.output.push(ch);
        if let Some(plain) = self.plain.as_mut() {
            plain.push(ch);
        }
        let width = self.char_advance(ch);
        self.advance(width, ch == ' ');
    }

    /// Emit `\n` and close the line.
    pub fn push_newline(&mut self) {
        self.output.push('\n');
        if let Some(plain) = self.plain.as_mut() {
            plain.push('\n');
        }
        self.line_break(LineBreak::Explicit);
    }

    /// Defeat the renderer's own tag matching for a literal `<` that follows.
    ///
    /// A zero-width space is the cheapest separator, but inside `<mspace>` or
    /// `<cspace>` it would take up room, so an empty bold toggle is used there.
    pub fn avoid_match(&mut self) {
        if self.monospace.is_some() || self.spacing != 0.0 {
            if self.flags.contains(TextFlags::BOLD) {
                self.output.push_str("</b><b>");
            } else {
                self.output.push_str("<b></b>");
            }
        } else {
            self.output.push(ZERO_WIDTH_SPACE);
        }
    }

    /// Horizontal advance of `ch` under the current formatting.
    pub fn char_advance(&self, ch: char) -> f32 {
        if let Some(mono) = self.monospace {
            return mono + self.spacing;
        }
        let (glyph, ratio) = match self.case {
            CaseStyle::Upper => (upper(ch), 1.0),
            CaseStyle::SmallCaps if ch.is_lowercase() => (upper(ch), self.metrics.smallcaps_ratio),
            CaseStyle::Lower => (lower(ch), 1.0),
            _ => (ch, 1.0),
        };
        let base = match char_width(glyph) {
            Some(w) => w,
            None => {
                debug!(target: "markup.metrics", ch = %glyph.escape_unicode(), "unknown_char_width");
                0.0
            }
        };
        let mut width = base * ratio * (self.size / self.metrics.default_size);
        if self
            .flags
            .intersects(TextFlags::SUPERSCRIPT | TextFlags::SUBSCRIPT)
        {
            width *= SCRIPT_WIDTH_RATIO;
        }
        width + self.spacing
    }

    /// Account for `width` of content on the current line, wrapping when the
    /// line overflows. `breakable` marks a space the renderer may wrap at.
    pub fn advance(&mut self, width: f32, breakable: bool) {
        self.width_since_space += width;
        if breakable && !self.flags.contains(TextFlags::NO_BREAK) {
            self.line_width += self.width_since_space;
            self.width_since_space = 0.0;
        }
        if self.line_width + self.width_since_space > self.functional_width() {
            self.line_break(LineBreak::Wrap { last: width });
        }
    }

    pub fn line_break(&mut self, kind: LineBreak) {
        self.offset += self.line_height();
        match kind {
            LineBreak::Explicit => {
                self.paragraph_start = true;
                self.line_width = 0.0;
            }
            LineBreak::Wrap { last } => {
                self.paragraph_start = false;
                // The unfinished word moves down with the wrap unless it is
                // wider than a whole line, in which case the renderer breaks
                // mid-word and only the overflowing glyph carries over.
                let carried = self.width_since_space;
                self.line_width = if carried > self.functional_width() {
                    last
                } else {
                    carried
                };
            }
        }
        self.width_since_space = 0.0;
    }
}

fn upper(ch: char) -> char {
    ch.to_uppercase().next().unwrap_or(ch)
}

fn lower(ch: char) -> char {
    ch.to_lowercase().next().unwrap_or(ch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_text::{DEFAULT_HEIGHT, DEFAULT_SIZE};

    fn ctx() -> ParseContext {
        ParseContext::new(LayoutMetrics::default())
    }

    #[test]
    fn defaults_match_metrics() {
        let c = ctx();
        assert_eq!(c.size, DEFAULT_SIZE);
        assert_eq!(c.line_height(), DEFAULT_HEIGHT);
        assert!(c.should_parse);
    }

    #[test]
    fn explicit_break_adds_line_height() {
        let mut c = ctx();
        c.push_char('a');
        c.push_newline();
        assert_eq!(c.offset, DEFAULT_HEIGHT);
        assert_eq!(c.line_width, 0.0);
        assert_eq!(c.width_since_space, 0.0);
        assert_eq!(c.output, "a\n");
    }

    #[test]
    fn space_commits_run_to_line() {
        let mut c = ctx();
        c.push_char('a');
        let run = c.width_since_space;
        c.push_char(' ');
        assert_eq!(c.width_since_space, 0.0);
        assert!(c.line_width > run);
    }

    #[test]
    fn no_break_keeps_run() {
        let mut c = ctx();
        c.flags.insert(TextFlags::NO_BREAK);
        c.push_char('a');
        c.push_char(' ');
        assert!(c.width_since_space > 0.0);
        assert_eq!(c.line_width, 0.0);
    }

    #[test]
    fn overflow_wraps_and_carries_word() {
        let mut c = ctx();
        c.metrics.display_width = 100.0;
        for ch in "aa bbbb".chars() {
            c.push_char(ch);
        }
        assert_eq!(c.offset, DEFAULT_HEIGHT, "one wrap expected");
        assert!(!c.paragraph_start);
        assert!(c.line_width > 0.0, "wrapped word carried to new line");
        assert!(!c.output.contains('\n'), "wraps emit no newline");
    }

    #[test]
    fn smallcaps_narrower_than_uppercase() {
        let mut c = ctx();
        c.case = CaseStyle::Upper;
        let upper_w = c.char_advance('a');
        c.case = CaseStyle::SmallCaps;
        let small_w = c.char_advance('a');
        assert!((small_w - upper_w * 0.8).abs() < 1e-4);
        assert_eq!(c.char_advance('A'), upper_w);
    }

    #[test]
    fn script_and_monospace() {
        let mut c = ctx();
        let normal = c.char_advance('m');
        c.flags.insert(TextFlags::SUPERSCRIPT);
        assert!((c.char_advance('m') - normal / 2.0).abs() < 1e-4);
        c.monospace = Some(10.0);
        c.spacing = 2.0;
        assert_eq!(c.char_advance('m'), 12.0);
        assert_eq!(c.char_advance('i'), 12.0);
    }

    #[test]
    fn avoid_match_prefers_zero_width_space() {
        let mut c = ctx();
        c.avoid_match();
        assert_eq!(c.output, "\u{200B}");
        c.output.clear();
        c.spacing = 1.0;
        c.avoid_match();
        assert_eq!(c.output, "<b></b>");
        c.output.clear();
        c.flags.insert(TextFlags::BOLD);
        c.avoid_match();
        assert_eq!(c.output, "</b><b>");
    }

    #[test]
    fn remove_closer_takes_latest() {
        let mut c = ctx();
        c.push_closer(TagKind::CloseSize);
        c.push_closer(TagKind::CloseBold);
        c.push_closer(TagKind::CloseSize);
        c.remove_closer(TagKind::CloseSize);
        assert_eq!(c.pending_closers, vec![TagKind::CloseSize, TagKind::CloseBold]);
    }
}
