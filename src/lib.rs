//! Animation engine for an addressable LED strip driven over HTTP.
//!
//! Clients POST scripts of timed frames. Each script becomes an
//! [`animation::Animation`] that draws into one shared frame buffer owned by
//! the [`manager::AnimationManager`]. Newer animations pre-empt older ones on
//! every pixel they touch, so each buffer slot has at most one writer.
//!
//! ## Layout
//! - [`model`]: validated, immutable animation scripts
//! - [`animation`]: per-animation playback state machine
//! - [`manager`]: pixel ownership arbitration and the shared buffer
//! - [`timer`]: cancellable frame timers
//! - [`engine`]: single-threaded reactor that serialises requests and timer fires
//! - [`driver`]: output sinks (logging, WS281x hardware)
//! - [`request`] and [`server`]: HTTP ingress and payload validation

pub mod animation;
pub mod driver;
pub mod engine;
pub mod manager;
pub mod model;
pub mod request;
pub mod server;
pub mod timer;

use std::fmt;

// ── Strip configuration ────────────────────────────────────────────

/// Configuration for the LED strip.
///
/// # Rust concept: derive macros
/// `Clone, Copy` make this cheaply copyable (it's a handful of integers).
/// Passing it explicitly keeps the strip length out of global state, so
/// tests can build a 4-pixel strip next to a 300-pixel one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StripConfig {
    /// Number of LEDs on the strip (N). Valid pixel indices are `0..N`.
    pub num_leds: usize,
    /// GPIO pin the strip's data line is attached to.
    pub gpio_pin: i32,
    /// Hardware brightness handed to the driver (0-255).
    pub brightness: u8,
}

impl StripConfig {
    pub fn new(num_leds: usize) -> Self {
        Self {
            num_leds,
            ..Self::default()
        }
    }

    /// Whether `index` addresses an LED on this strip.
    pub fn contains(&self, index: usize) -> bool {
        index < self.num_leds
    }
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            num_leds: 12,
            gpio_pin: 18,
            brightness: 255,
        }
    }
}

// ── Color ──────────────────────────────────────────────────────────

/// Largest packed color value (`0xFFFFFF`).
pub const MAX_COLOR: u32 = 0x00FF_FFFF;

/// An RGB color unpacked from the 24-bit `0xRRGGBB` values the buffer holds.
///
/// The frame buffer stores packed integers because that is what the strip
/// driver consumes. This type exists for the boundaries that need channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Unpack a `0xRRGGBB` value. Bits above 24 are ignored.
    pub fn from_packed(value: u32) -> Self {
        Self {
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn strip_config_default_matches_reference_wiring() {
        let strip = StripConfig::default();
        assert_eq!(strip.num_leds, 12);
        assert_eq!(strip.gpio_pin, 18);
        assert_eq!(strip.brightness, 255);
    }

    #[rstest]
    #[case(4, 0, true)]
    #[case(4, 3, true)]
    #[case(4, 4, false)]
    #[case(0, 0, false)]
    fn strip_contains(#[case] len: usize, #[case] index: usize, #[case] expected: bool) {
        assert_eq!(StripConfig::new(len).contains(index), expected);
    }

    #[rstest]
    #[case(0xFF0000, 255, 0, 0)]
    #[case(0x00FF00, 0, 255, 0)]
    #[case(0x0000FF, 0, 0, 255)]
    #[case(0x123456, 0x12, 0x34, 0x56)]
    fn color_unpacks_channels(#[case] packed: u32, #[case] r: u8, #[case] g: u8, #[case] b: u8) {
        assert_eq!(Color::from_packed(packed), Color { r, g, b });
    }

    #[test]
    fn color_displays_as_hex() {
        assert_eq!(Color::from_packed(0x0A0B0C).to_string(), "#0A0B0C");
    }
}
