//! Markup Parser: one pass over the source characters.
//!
//! States:
//! - `CollectingText`: ordinary characters go straight to the context.
//! - `DescendingTag`: after `<`, accumulating a candidate tag name.
//! - `CollectingParams`: the name resolved to a value/attribute handler;
//!   accumulating its parameter text until `>`.
//!
//! Failure policy: whenever a candidate tag cannot be matched (unknown name,
//! bad character, name too long, rejected parameters, a newline or a new `<`
//! mid-tag, end of input) everything consumed for it is replayed as literal
//! text, preceded by the match-avoidance marker, and the machine returns to
//! `CollectingText`. A malformed tag therefore degrades to visible text and is
//! never dropped.
//!
//! The parser is total: every input produces a `ParsedResult`.

use std::sync::Arc;

use core_text::{LayoutMetrics, MAX_TAG_NAME_SIZE};
use serde::Serialize;
use tracing::trace;

use crate::context::ParseContext;
use crate::registry::TagRegistry;
use crate::tags::{RichTextTag, TagKind, TagStyle};

/// Normalized markup plus the vertical space it occupies.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ParsedResult {
    pub content: String,
    /// Sum of the active line height at every line break.
    pub offset: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    CollectingText,
    DescendingTag,
    CollectingParams,
}

/// Scratch state for the tag currently being matched.
struct TagMatch<'r> {
    registry: &'r TagRegistry,
    state: State,
    name: String,
    delimiter: Option<char>,
    params: String,
    tag: Option<TagKind>,
}

fn is_tag_name_char(ch: char) -> bool {
    ch.is_ascii_alphabetic() || matches!(ch, '-' | '/' | '\\')
}

impl<'r> TagMatch<'r> {
    fn new(registry: &'r TagRegistry) -> Self {
        Self {
            registry,
            state: State::CollectingText,
            name: String::with_capacity(MAX_TAG_NAME_SIZE),
            delimiter: None,
            params: String::new(),
            tag: None,
        }
    }

    fn reset(&mut self) {
        self.state = State::CollectingText;
        self.name.clear();
        self.params.clear();
        self.delimiter = None;
        self.tag = None;
    }

    fn in_tag(&self) -> bool {
        self.state != State::CollectingText
    }

    /// Replay everything buffered for the current candidate as literal text.
    fn fail(&mut self, ctx: &mut ParseContext) {
        trace!(target: "markup.parser", name = self.name.as_str(), params = self.params.len(), "tag_match_failed");
        ctx.avoid_match();
        ctx.push_char('<');
        for ch in self.name.chars() {
            ctx.push_char(ch);
        }
        if let Some(d) = self.delimiter {
            ctx.push_char(d);
        }
        for ch in self.params.chars() {
            ctx.push_char(ch);
        }
        self.reset();
    }

    /// Resolve the buffered name for `style`, honouring no-parse spans where
    /// only the closing no-parse tag is live.
    fn resolve(&self, ctx: &ParseContext, style: TagStyle) -> Option<TagKind> {
        let tag = self.registry.lookup(&self.name, style)?;
        (ctx.should_parse || tag == TagKind::CloseNoParse).then_some(tag)
    }

    fn descend(&mut self, ch: char, ctx: &mut ParseContext) {
        if is_tag_name_char(ch) {
            if self.name.len() >= MAX_TAG_NAME_SIZE {
                self.fail(ctx);
                ctx.push_char(ch);
            } else {
                self.name.push(ch);
            }
            return;
        }
        match ch {
            '>' => match self.resolve(ctx, TagStyle::NoParams) {
                Some(tag) if tag.handle(ctx, "") => self.reset(),
                _ => {
                    self.fail(ctx);
                    ctx.push_char(ch);
                }
            },
            ' ' | '=' => {
                let style = if ch == '=' {
                    TagStyle::ValueParam
                } else {
                    TagStyle::Attributes
                };
                match self.resolve(ctx, style) {
                    Some(tag) => {
                        self.tag = Some(tag);
                        self.delimiter = Some(ch);
                        self.state = State::CollectingParams;
                    }
                    None => {
                        self.fail(ctx);
                        ctx.push_char(ch);
                    }
                }
            }
            _ => {
                self.fail(ctx);
                ctx.push_char(ch);
            }
        }
    }

    fn collect_param(&mut self, ch: char, ctx: &mut ParseContext) {
        if ch != '>' {
            self.params.push(ch);
            return;
        }
        match self.tag {
            Some(tag) if tag.handle(ctx, &self.params) => self.reset(),
            _ => {
                self.fail(ctx);
                ctx.push_char(ch);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Parser {
    registry: Arc<TagRegistry>,
    metrics: LayoutMetrics,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(Arc::new(TagRegistry::builtin()), LayoutMetrics::default())
    }
}

impl Parser {
    pub fn new(registry: Arc<TagRegistry>, metrics: LayoutMetrics) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &LayoutMetrics {
        &self.metrics
    }

    pub fn parse(&self, text: &str) -> ParsedResult {
        let ctx = self.parse_context(text);
        ParsedResult {
            content: ctx.output,
            offset: ctx.offset,
        }
    }

    /// Run a parse and return the final context (after closing obligations
    /// were applied). Useful for inspecting formatting state.
    pub fn parse_context(&self, text: &str) -> ParseContext {
        self.run(ParseContext::new(self.metrics), text)
    }

    /// The text a viewer would see, with every recognized tag removed.
    pub fn plain_text(&self, text: &str) -> String {
        let mut ctx = ParseContext::new(self.metrics);
        ctx.plain = Some(String::with_capacity(text.len()));
        self.run(ctx, text).plain.unwrap_or_default()
    }

    fn run(&self, mut ctx: ParseContext, text: &str) -> ParseContext {
        ctx.output.reserve(text.len());
        let mut m = TagMatch::new(&self.registry);

        for ch in text.chars() {
            if ch == '<' {
                if m.in_tag() {
                    m.fail(&mut ctx);
                }
                m.state = State::DescendingTag;
                continue;
            }
            if ch == '\n' {
                if m.in_tag() {
                    m.fail(&mut ctx);
                }
                ctx.push_newline();
                continue;
            }
            match m.state {
                State::CollectingText => ctx.push_char(ch),
                State::DescendingTag => m.descend(ch, &mut ctx),
                State::CollectingParams => m.collect_param(ch, &mut ctx),
            }
        }

        if m.in_tag() {
            m.fail(&mut ctx);
        }
        ctx.close_pending();
        trace!(target: "markup.parser", bytes = text.len(), offset = ctx.offset, "parsed");
        ctx
    }
}
