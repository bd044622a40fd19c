//! Measurement parameter grammar shared by size-like tags.
//!
//! Accepted shape: optional leading sign, digits with at most one decimal
//! point, then a unit suffix of `%`, `e`/`em`/`ems`, or nothing / `px`
//! (pixels). Characters outside that grammar are skipped rather than rejected,
//! so `<size= 40 px>` and `<size=40px>` are equivalent. A parameter without a
//! single digit is invalid.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    Pixels,
    Ems,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    pub value: f32,
    pub unit: Unit,
}

impl Measurement {
    /// Resolve to pixels. `percent_of` is the value `100%` maps to.
    pub fn to_pixels(self, percent_of: f32, ems_to_pixels: f32) -> f32 {
        match self.unit {
            Unit::Pixels => self.value,
            Unit::Ems => self.value * ems_to_pixels,
            Unit::Percent => self.value / 100.0 * percent_of,
        }
    }

    /// `to_pixels`, or `None` when scaling overflowed.
    pub fn to_finite_pixels(self, percent_of: f32, ems_to_pixels: f32) -> Option<f32> {
        Some(self.to_pixels(percent_of, ems_to_pixels)).filter(|px| px.is_finite())
    }
}

pub fn parse_measurement(params: &str) -> Option<Measurement> {
    let mut digits = String::with_capacity(params.len());
    let mut negative = false;
    let mut seen_sign = false;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut unit = Unit::Pixels;

    for ch in params.chars() {
        match ch {
            '+' | '-' if !seen_sign && !seen_digit && !seen_dot => {
                seen_sign = true;
                negative = ch == '-';
            }
            '0'..='9' => {
                seen_digit = true;
                digits.push(ch);
            }
            '.' if !seen_dot => {
                seen_dot = true;
                if digits.is_empty() {
                    digits.push('0');
                }
                digits.push('.');
            }
            '%' => {
                unit = Unit::Percent;
                break;
            }
            'e' | 'E' => {
                unit = Unit::Ems;
                break;
            }
            'p' | 'P' => {
                unit = Unit::Pixels;
                break;
            }
            _ => {}
        }
    }

    if !seen_digit {
        return None;
    }
    let magnitude: f32 = digits.parse().ok()?;
    let value = if negative { -magnitude } else { magnitude };
    value.is_finite().then_some(Measurement { value, unit })
}

/// Render a pixel value for emitted markup: at most three decimals, no
/// trailing zeros, never `-0`.
pub fn format_px(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let mut s = format!("{value:.3}");
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}
