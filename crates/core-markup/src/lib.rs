//! Rich-text markup parsing for the overlay renderer.
//!
//! The remote viewer renders a markup dialect whose tags change size, line
//! height, wrapping and case. To stack several independent pieces of markup
//! the compositor must know how much vertical space each one occupies, so this
//! crate re-implements just enough of the dialect to measure it:
//!
//! - `Parser::parse` turns raw element text into normalized markup and a
//!   vertical offset (`ParsedResult`).
//! - `ParseContext` is the per-call mutable state tag handlers act on.
//! - `TagKind` is the closed set of handlers, dispatched through
//!   `RichTextTag`; `TagRegistry` maps names and delimiter styles to them.
//!
//! Output guarantees:
//! - Every scoped tag that was opened is closed (end-of-input obligations).
//! - A literal `<` is always preceded by a match-avoidance marker.
//! - The parser never fails; malformed input degrades to literal text.

pub mod context;
pub mod parser;
pub mod registry;
pub mod tags;
pub mod util;

pub use context::{CaseStyle, LineBreak, ParseContext, TextFlags};
pub use parser::{ParsedResult, Parser};
pub use registry::{TagRegistry, TagRegistryBuilder};
pub use tags::measure::{Measurement, Unit, format_px, parse_measurement};
pub use tags::{RichTextTag, Script, TagKind, TagStyle};
pub use util::escape_markup;
