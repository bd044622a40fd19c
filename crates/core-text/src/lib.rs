//! Layout constants and the character metrics table shared by the markup
//! parser and the element compositor.
//!
//! All measurements are in "pixel-equivalent" units of the remote viewer's
//! overlay surface. The values below describe the viewer's default font at its
//! reference size; `LayoutMetrics` carries the same values at runtime so the
//! configuration layer can override them without recompiling.

pub mod width;

pub use width::{CharWidth, char_width, char_width_units};

/// Font size (px) the metrics table is expressed at.
pub const DEFAULT_SIZE: f32 = 34.7;
/// Line height (px) of an unmodified line at `DEFAULT_SIZE`.
pub const DEFAULT_HEIGHT: f32 = 40.665;
/// Usable width of the overlay before the renderer wraps a line.
pub const DISPLAY_AREA_WIDTH: f32 = 1200.0;
/// Pixels per `em` unit.
pub const EMS_TO_PIXELS: f32 = 34.7;
/// Width ratio of a small-caps glyph relative to the capital it substitutes.
pub const CAPS_TO_SMALLCAPS: f32 = 0.8;
/// Longest tag name the parser will attempt to match.
pub const MAX_TAG_NAME_SIZE: usize = 13;
/// Inserted before literal `<` so the renderer does not treat it as a tag.
pub const ZERO_WIDTH_SPACE: char = '\u{200B}';
/// Scaled (0..=1000) to functional position multiplier.
pub const POSITION_SCALE: f32 = 2.14;
/// Functional position of scaled position 0.
pub const POSITION_BASELINE: f32 = -755.0;

/// Runtime copy of the layout constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutMetrics {
    pub display_width: f32,
    pub default_size: f32,
    pub default_line_height: f32,
    pub ems_to_pixels: f32,
    pub smallcaps_ratio: f32,
    pub position_scale: f32,
    pub position_baseline: f32,
}

impl Default for LayoutMetrics {
    fn default() -> Self {
        Self {
            display_width: DISPLAY_AREA_WIDTH,
            default_size: DEFAULT_SIZE,
            default_line_height: DEFAULT_HEIGHT,
            ems_to_pixels: EMS_TO_PIXELS,
            smallcaps_ratio: CAPS_TO_SMALLCAPS,
            position_scale: POSITION_SCALE,
            position_baseline: POSITION_BASELINE,
        }
    }
}

impl LayoutMetrics {
    /// Map a caller-facing 0..=1000 position to the functional pixel position.
    pub fn functional_position(&self, scaled: f32) -> f32 {
        scaled * self.position_scale + self.position_baseline
    }

    /// Inverse of `functional_position`.
    pub fn scaled_position(&self, functional: f32) -> f32 {
        (functional - self.position_baseline) / self.position_scale
    }

    /// Line height implied by a font size when no explicit line height is set.
    pub fn line_height_for_size(&self, size: f32) -> f32 {
        self.default_line_height * (size / self.default_size)
    }
}
