//! Validation of animation payloads submitted over HTTP.
//!
//! The engine never sees malformed input: a JSON frame list is checked here,
//! rule by rule, and only a fully valid payload becomes an
//! [`AnimationModel`]. The first failing rule is reported.
//!
//! Accepted frame shape:
//! ```json
//! { "duration": 250, "pixels": { "0": 16711680, "3": "0x00FF00" } }
//! ```
//! `duration` is in milliseconds (number or numeric string). Colors are
//! integers in `0..=0xFFFFFF`, given as numbers, decimal strings or `0x` hex
//! strings.

use crate::{MAX_COLOR, StripConfig};
use crate::model::{AnimationModel, Frame};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Why a payload was rejected.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("POST data must be an array of animation frames")]
    NotAnArray,
    #[error("Frame #{frame} must be an object, got {found}.")]
    FrameNotObject { frame: usize, found: &'static str },
    #[error("Missing 'duration' property in frame #{frame}.")]
    MissingDuration { frame: usize },
    #[error("Value of 'duration' property in frame #{frame} must be a non-negative float.")]
    InvalidDuration { frame: usize },
    #[error("Missing 'pixels' property in frame #{frame}.")]
    MissingPixels { frame: usize },
    #[error("Value of 'pixels' property in frame #{frame} must be an object, got {found}.")]
    PixelsNotObject { frame: usize, found: &'static str },
    #[error("Bad pixel ID in frame #{frame}: '{key}' (must be a non-negative integer).")]
    InvalidPixelId { frame: usize, key: String },
    #[error("Bad pixel ID in frame #{frame}: '{key}' does not exist (max {num_leds}).")]
    PixelOutOfRange {
        frame: usize,
        key: String,
        num_leds: usize,
    },
    #[error("Bad pixel color in frame #{frame}: pixel #{key} must be between 0x000000 and 0xFFFFFF.")]
    InvalidColor { frame: usize, key: String },
}

/// Turn a JSON frame list into a model for `strip`.
pub fn parse_frames(
    frames: &Value,
    repeat: bool,
    strip: StripConfig,
) -> Result<AnimationModel, ValidationError> {
    let frames = frames.as_array().ok_or(ValidationError::NotAnArray)?;

    let frames = frames
        .iter()
        .enumerate()
        .map(|(index, frame)| parse_frame(index, frame, strip))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AnimationModel::new(frames, repeat))
}

fn parse_frame(frame: usize, value: &Value, strip: StripConfig) -> Result<Frame, ValidationError> {
    let object = value.as_object().ok_or(ValidationError::FrameNotObject {
        frame,
        found: type_name(value),
    })?;

    let duration = object
        .get("duration")
        .ok_or(ValidationError::MissingDuration { frame })?;
    let duration_ms = parse_duration(duration).ok_or(ValidationError::InvalidDuration { frame })?;

    let pixels = object
        .get("pixels")
        .ok_or(ValidationError::MissingPixels { frame })?;
    let pixels = pixels.as_object().ok_or(ValidationError::PixelsNotObject {
        frame,
        found: type_name(pixels),
    })?;

    Ok(Frame {
        duration_ms,
        pixels: parse_pixels(frame, pixels, strip)?,
    })
}

fn parse_pixels(
    frame: usize,
    pixels: &Map<String, Value>,
    strip: StripConfig,
) -> Result<BTreeMap<usize, u32>, ValidationError> {
    let mut parsed = BTreeMap::new();
    for (key, value) in pixels {
        // Digits only: `str::parse` would also take a leading `+`.
        let index = Some(key.trim())
            .filter(|k| k.starts_with(|c: char| c.is_ascii_digit()))
            .and_then(|k| k.parse::<usize>().ok())
            .ok_or_else(|| ValidationError::InvalidPixelId {
                frame,
                key: key.clone(),
            })?;
        if !strip.contains(index) {
            return Err(ValidationError::PixelOutOfRange {
                frame,
                key: key.clone(),
                num_leds: strip.num_leds,
            });
        }
        let color = parse_color(value).ok_or(ValidationError::InvalidColor {
            frame,
            key: key.clone(),
        })?;
        parsed.insert(index, color);
    }
    Ok(parsed)
}

/// Finite, non-negative milliseconds.
fn parse_duration(value: &Value) -> Option<f64> {
    let ms = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (ms.is_finite() && ms >= 0.0).then_some(ms)
}

fn parse_color(value: &Value) -> Option<u32> {
    let color = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok()?,
                None => s.parse::<u64>().ok()?,
            }
        }
        _ => return None,
    };
    u32::try_from(color).ok().filter(|&c| c <= MAX_COLOR)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
