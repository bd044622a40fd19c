//! Tag handlers.
//!
//! Every tag the parser understands is one variant of the closed `TagKind`
//! enum. The parser only talks to handlers through `RichTextTag`, so adding a
//! tag means adding a variant, its names/style, and a `handle` arm; the
//! registry picks it up from `TagKind::BUILTIN`.
//!
//! Handler contract:
//! - `handle` returns `false` when the parameters are invalid. It must not
//!   touch the context in that case; the parser replays the tag as text.
//! - Openers of scoped effects push their closer with `push_closer`; closers
//!   restore state, emit the closing markup and call `remove_closer`.
//! - Closers never fail, so end-of-input cleanup always succeeds.

pub mod measure;

use serde::Serialize;

use crate::context::{CaseStyle, LineBreak, ParseContext, TextFlags};
use measure::{format_px, parse_measurement};

/// Delimiter a tag was invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TagStyle {
    /// `<name>`
    NoParams,
    /// `<name=value>`
    ValueParam,
    /// `<name key=value ...>`
    Attributes,
}

/// Capability interface the parser dispatches through.
pub trait RichTextTag {
    /// Names this handler answers to (lowercase, closing tags include `/`).
    fn names(&self) -> &'static [&'static str];
    fn style(&self) -> TagStyle;
    /// Apply the tag. `params` is the raw text between the delimiter and `>`.
    fn handle(&self, ctx: &mut ParseContext, params: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Script {
    Super,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TagKind {
    Size,
    CloseSize,
    LineHeight,
    CloseLineHeight,
    Indent,
    CloseIndent,
    LineIndent,
    CloseLineIndent,
    Bold,
    CloseBold,
    Break,
    NoParse,
    CloseNoParse,
    NoBreak,
    CloseNoBreak,
    Case(CaseStyle),
    CloseCase(CaseStyle),
    Monospace,
    CloseMonospace,
    CharSpace,
    CloseCharSpace,
    Script(Script),
    CloseScript(Script),
    Color,
    CloseColor,
    Align,
    CloseAlign,
    Sprite,
}

const NAMED_COLORS: &[&str] = &[
    "black", "blue", "green", "orange", "purple", "red", "white", "yellow",
];

const ALIGNMENTS: &[&str] = &["left", "center", "right", "justified", "flush"];

impl TagKind {
    /// Declarative list the default registry is built from.
    pub const BUILTIN: &'static [TagKind] = &[
        TagKind::Size,
        TagKind::CloseSize,
        TagKind::LineHeight,
        TagKind::CloseLineHeight,
        TagKind::Indent,
        TagKind::CloseIndent,
        TagKind::LineIndent,
        TagKind::CloseLineIndent,
        TagKind::Bold,
        TagKind::CloseBold,
        TagKind::Break,
        TagKind::NoParse,
        TagKind::CloseNoParse,
        TagKind::NoBreak,
        TagKind::CloseNoBreak,
        TagKind::Case(CaseStyle::Upper),
        TagKind::CloseCase(CaseStyle::Upper),
        TagKind::Case(CaseStyle::Lower),
        TagKind::CloseCase(CaseStyle::Lower),
        TagKind::Case(CaseStyle::SmallCaps),
        TagKind::CloseCase(CaseStyle::SmallCaps),
        TagKind::Monospace,
        TagKind::CloseMonospace,
        TagKind::CharSpace,
        TagKind::CloseCharSpace,
        TagKind::Script(Script::Super),
        TagKind::CloseScript(Script::Super),
        TagKind::Script(Script::Sub),
        TagKind::CloseScript(Script::Sub),
        TagKind::Color,
        TagKind::CloseColor,
        TagKind::Align,
        TagKind::CloseAlign,
        TagKind::Sprite,
    ];

    fn case_name(style: CaseStyle) -> &'static str {
        match style {
            CaseStyle::Upper => "uppercase",
            CaseStyle::Lower => "lowercase",
            CaseStyle::SmallCaps => "smallcaps",
            CaseStyle::Normal => "",
        }
    }

    fn script_flag(script: Script) -> (TextFlags, &'static str) {
        match script {
            Script::Super => (TextFlags::SUPERSCRIPT, "sup"),
            Script::Sub => (TextFlags::SUBSCRIPT, "sub"),
        }
    }
}

impl RichTextTag for TagKind {
    fn names(&self) -> &'static [&'static str] {
        match self {
            TagKind::Size => &["size"],
            TagKind::CloseSize => &["/size"],
            TagKind::LineHeight => &["line-height"],
            TagKind::CloseLineHeight => &["/line-height"],
            TagKind::Indent => &["indent"],
            TagKind::CloseIndent => &["/indent"],
            TagKind::LineIndent => &["line-indent"],
            TagKind::CloseLineIndent => &["/line-indent"],
            TagKind::Bold => &["b"],
            TagKind::CloseBold => &["/b"],
            TagKind::Break => &["br"],
            TagKind::NoParse => &["noparse"],
            TagKind::CloseNoParse => &["/noparse"],
            TagKind::NoBreak => &["nobr"],
            TagKind::CloseNoBreak => &["/nobr"],
            TagKind::Case(CaseStyle::Upper) => &["uppercase", "allcaps"],
            TagKind::CloseCase(CaseStyle::Upper) => &["/uppercase", "/allcaps"],
            TagKind::Case(CaseStyle::Lower) => &["lowercase"],
            TagKind::CloseCase(CaseStyle::Lower) => &["/lowercase"],
            TagKind::Case(CaseStyle::SmallCaps) => &["smallcaps"],
            TagKind::CloseCase(CaseStyle::SmallCaps) => &["/smallcaps"],
            TagKind::Case(CaseStyle::Normal) | TagKind::CloseCase(CaseStyle::Normal) => &[],
            TagKind::Monospace => &["mspace"],
            TagKind::CloseMonospace => &["/mspace"],
            TagKind::CharSpace => &["cspace"],
            TagKind::CloseCharSpace => &["/cspace"],
            TagKind::Script(Script::Super) => &["sup"],
            TagKind::CloseScript(Script::Super) => &["/sup"],
            TagKind::Script(Script::Sub) => &["sub"],
            TagKind::CloseScript(Script::Sub) => &["/sub"],
            TagKind::Color => &["color"],
            TagKind::CloseColor => &["/color"],
            TagKind::Align => &["align"],
            TagKind::CloseAlign => &["/align"],
            TagKind::Sprite => &["sprite"],
        }
    }

    fn style(&self) -> TagStyle {
        match self {
            TagKind::Size
            | TagKind::LineHeight
            | TagKind::Indent
            | TagKind::LineIndent
            | TagKind::Monospace
            | TagKind::CharSpace
            | TagKind::Color
            | TagKind::Align => TagStyle::ValueParam,
            TagKind::Sprite => TagStyle::Attributes,
            _ => TagStyle::NoParams,
        }
    }

    fn handle(&self, ctx: &mut ParseContext, params: &str) -> bool {
        let metrics = ctx.metrics;
        match *self {
            TagKind::Size => {
                let Some(m) = parse_measurement(params) else {
                    return false;
                };
                let Some(px) = m.to_finite_pixels(metrics.default_size, metrics.ems_to_pixels) else {
                    return false;
                };
                if px < 0.0 {
                    return false;
                }
                ctx.size_stack.push(ctx.size);
                ctx.size = px;
                ctx.push_str(&format!("<size={}px>", format_px(px)));
                ctx.push_closer(TagKind::CloseSize);
            }
            TagKind::CloseSize => {
                ctx.size = ctx.size_stack.pop().unwrap_or(metrics.default_size);
                ctx.push_str("</size>");
                ctx.remove_closer(TagKind::CloseSize);
            }
            TagKind::LineHeight => {
                let Some(m) = parse_measurement(params) else {
                    return false;
                };
                let Some(px) = m.to_finite_pixels(metrics.default_line_height, metrics.ems_to_pixels) else {
                    return false;
                };
                ctx.line_height_override = Some(px);
                ctx.push_str(&format!("<line-height={}px>", format_px(px)));
                ctx.push_closer(TagKind::CloseLineHeight);
            }
            TagKind::CloseLineHeight => {
                ctx.line_height_override = None;
                ctx.push_str("</line-height>");
                ctx.remove_closer(TagKind::CloseLineHeight);
            }
            TagKind::Indent | TagKind::LineIndent => {
                let Some(m) = parse_measurement(params) else {
                    return false;
                };
                let Some(px) = m.to_finite_pixels(metrics.display_width, metrics.ems_to_pixels) else {
                    return false;
                };
                let (name, closer) = if *self == TagKind::Indent {
                    ctx.indent = px;
                    ("indent", TagKind::CloseIndent)
                } else {
                    ctx.line_indent = px;
                    ("line-indent", TagKind::CloseLineIndent)
                };
                ctx.push_str(&format!("<{name}={}px>", format_px(px)));
                ctx.push_closer(closer);
            }
            TagKind::CloseIndent => {
                ctx.indent = 0.0;
                ctx.push_str("</indent>");
                ctx.remove_closer(TagKind::CloseIndent);
            }
            TagKind::CloseLineIndent => {
                ctx.line_indent = 0.0;
                ctx.push_str("</line-indent>");
                ctx.remove_closer(TagKind::CloseLineIndent);
            }
            TagKind::Bold => {
                ctx.flags.insert(TextFlags::BOLD);
                ctx.push_str("<b>");
                ctx.push_closer(TagKind::CloseBold);
            }
            TagKind::CloseBold => {
                ctx.flags.remove(TextFlags::BOLD);
                ctx.push_str("</b>");
                ctx.remove_closer(TagKind::CloseBold);
            }
            TagKind::Break => {
                ctx.push_str("<br>");
                ctx.line_break(LineBreak::Explicit);
            }
            TagKind::NoParse => {
                ctx.should_parse = false;
                ctx.push_str("<noparse>");
                ctx.push_closer(TagKind::CloseNoParse);
            }
            TagKind::CloseNoParse => {
                ctx.should_parse = true;
                ctx.push_str("</noparse>");
                ctx.remove_closer(TagKind::CloseNoParse);
            }
            TagKind::NoBreak => {
                ctx.flags.insert(TextFlags::NO_BREAK);
                ctx.push_str("<nobr>");
                ctx.push_closer(TagKind::CloseNoBreak);
            }
            TagKind::CloseNoBreak => {
                ctx.flags.remove(TextFlags::NO_BREAK);
                ctx.push_str("</nobr>");
                ctx.remove_closer(TagKind::CloseNoBreak);
            }
            TagKind::Case(style) => {
                if style == CaseStyle::Normal {
                    return false;
                }
                ctx.case = style;
                ctx.push_str(&format!("<{}>", Self::case_name(style)));
                ctx.push_closer(TagKind::CloseCase(style));
            }
            TagKind::CloseCase(style) => {
                if ctx.case == style {
                    ctx.case = CaseStyle::Normal;
                }
                if style != CaseStyle::Normal {
                    ctx.push_str(&format!("</{}>", Self::case_name(style)));
                }
                ctx.remove_closer(TagKind::CloseCase(style));
            }
            TagKind::Monospace => {
                let Some(m) = parse_measurement(params) else {
                    return false;
                };
                let Some(px) = m.to_finite_pixels(metrics.ems_to_pixels, metrics.ems_to_pixels) else {
                    return false;
                };
                if px < 0.0 {
                    return false;
                }
                ctx.monospace = Some(px);
                ctx.push_str(&format!("<mspace={}px>", format_px(px)));
                ctx.push_closer(TagKind::CloseMonospace);
            }
            TagKind::CloseMonospace => {
                ctx.monospace = None;
                ctx.push_str("</mspace>");
                ctx.remove_closer(TagKind::CloseMonospace);
            }
            TagKind::CharSpace => {
                let Some(m) = parse_measurement(params) else {
                    return false;
                };
                let Some(px) = m.to_finite_pixels(metrics.ems_to_pixels, metrics.ems_to_pixels) else {
                    return false;
                };
                ctx.spacing = px;
                ctx.push_str(&format!("<cspace={}px>", format_px(px)));
                ctx.push_closer(TagKind::CloseCharSpace);
            }
            TagKind::CloseCharSpace => {
                ctx.spacing = 0.0;
                ctx.push_str("</cspace>");
                ctx.remove_closer(TagKind::CloseCharSpace);
            }
            TagKind::Script(script) => {
                let (flag, name) = Self::script_flag(script);
                ctx.flags.insert(flag);
                ctx.push_str(&format!("<{name}>"));
                ctx.push_closer(TagKind::CloseScript(script));
            }
            TagKind::CloseScript(script) => {
                let (flag, name) = Self::script_flag(script);
                ctx.flags.remove(flag);
                ctx.push_str(&format!("</{name}>"));
                ctx.remove_closer(TagKind::CloseScript(script));
            }
            TagKind::Color => {
                let Some(color) = parse_color(params) else {
                    return false;
                };
                ctx.push_str(&format!("<color={color}>"));
                ctx.push_closer(TagKind::CloseColor);
            }
            TagKind::CloseColor => {
                ctx.push_str("</color>");
                ctx.remove_closer(TagKind::CloseColor);
            }
            TagKind::Align => {
                let value = unquote(params).to_ascii_lowercase();
                if !ALIGNMENTS.contains(&value.as_str()) {
                    return false;
                }
                ctx.push_str(&format!("<align={value}>"));
                ctx.push_closer(TagKind::CloseAlign);
            }
            TagKind::CloseAlign => {
                ctx.push_str("</align>");
                ctx.remove_closer(TagKind::CloseAlign);
            }
            TagKind::Sprite => {
                let Some(attrs) = parse_sprite_attributes(params) else {
                    return false;
                };
                ctx.push_str(&format!("<sprite {attrs}>"));
                // Inline sprites occupy roughly one em of the current size.
                let width = ctx.size;
                ctx.advance(width, false);
            }
        }
        true
    }
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    v.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(v)
}

/// Accepts `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa` or a named colour.
fn parse_color(params: &str) -> Option<String> {
    let value = unquote(params);
    if let Some(hex) = value.strip_prefix('#') {
        let valid_len = matches!(hex.len(), 3 | 4 | 6 | 8);
        if valid_len && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some(format!("#{}", hex.to_ascii_lowercase()));
        }
        return None;
    }
    let lower = value.to_ascii_lowercase();
    NAMED_COLORS
        .contains(&lower.as_str())
        .then(|| format!("\"{lower}\""))
}

/// Sprites are addressed by `name="..."` or `index=N`; anything else is
/// carried through untouched as long as one of those keys is present.
fn parse_sprite_attributes(params: &str) -> Option<String> {
    let mut valid = false;
    let mut out = Vec::new();
    for attr in params.split_whitespace() {
        let (key, value) = attr.split_once('=')?;
        let key = key.to_ascii_lowercase();
        let value = unquote(value);
        match key.as_str() {
            "name" if !value.is_empty() => {
                valid = true;
                out.push(format!("name=\"{value}\""));
            }
            "index" if value.parse::<u32>().is_ok() => {
                valid = true;
                out.push(format!("index={value}"));
            }
            "name" | "index" => return None,
            _ => out.push(format!("{key}={value}")),
        }
    }
    valid.then(|| out.join(" "))
}
