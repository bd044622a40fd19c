//! Element model and compositor.
//!
//! Elements are independently positioned pieces of markup. The compositor
//! stacks the enabled ones into a single block the display can show, using
//! the parser's offsets to predict how far each element pushes the cursor.

pub mod combiner;
pub mod element;
pub mod reference;

pub use combiner::{CLOSING_TAGS, combine, spacer_height};
pub use element::{Content, Element, ElementOptions, ElementStore, Generator};
pub use reference::{ElementId, ElementRef};
