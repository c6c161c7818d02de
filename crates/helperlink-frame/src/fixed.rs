//! Fixed-point encodings for floating values.
//!
//! Floating values never travel as IEEE floats. Each quantity has a scale and
//! an offset that turns it into an unsigned integer:
//!
//! | encoding | use                        | scale  | offset       | range              |
//! |----------|----------------------------|--------|--------------|--------------------|
//! | 3.7      | latitude, longitude        | 10^7   | 180 × 10^7   | -180 ..= 180       |
//! | 6.4      | altitude (metres)          | 10^4   | 180000 × 10^4| -180000 ..= 180000 |
//! | 3.6      | speed, heading, precision  | 10^6   | 0            | 0 ..= 4294         |
//!
//! Encoding rounds to the nearest step, so a decode recovers the input to
//! within half a step: [`LATLON_EPSILON`], [`ALTITUDE_EPSILON`],
//! [`RATE_EPSILON`].

use crate::error::{FrameError, Result};

const LATLON_SCALE: f64 = 10_000_000.0;
const LATLON_LIMIT: f64 = 180.0;

const ALTITUDE_SCALE: f64 = 10_000.0;
const ALTITUDE_LIMIT: f64 = 180_000.0;

const RATE_SCALE: f64 = 1_000_000.0;
const RATE_LIMIT: f64 = u32::MAX as f64 / RATE_SCALE;

/// Maximum decode error for latitude/longitude.
pub const LATLON_EPSILON: f64 = 1e-7;
/// Maximum decode error for altitude.
pub const ALTITUDE_EPSILON: f64 = 1e-4;
/// Maximum decode error for rates.
pub const RATE_EPSILON: f64 = 1e-6;

fn encode_offset(value: f64, scale: f64, limit: f64) -> Result<u32> {
    if !value.is_finite() || value < -limit || value > limit {
        return Err(FrameError::OutOfRange {
            value,
            min: -limit,
            max: limit,
        });
    }
    // (value + limit) * scale is within 0..=2 * limit * scale < u32::MAX.
    Ok(((value + limit) * scale).round() as u32)
}

fn decode_offset(raw: u32, scale: f64, limit: f64) -> f64 {
    f64::from(raw) / scale - limit
}

/// Encode a latitude or longitude in degrees (3.7).
pub fn encode_latlon(degrees: f64) -> Result<u32> {
    encode_offset(degrees, LATLON_SCALE, LATLON_LIMIT)
}

/// Decode a 3.7 latitude or longitude.
pub fn decode_latlon(raw: u32) -> f64 {
    decode_offset(raw, LATLON_SCALE, LATLON_LIMIT)
}

/// Encode an altitude in metres (6.4).
pub fn encode_altitude(metres: f64) -> Result<u32> {
    encode_offset(metres, ALTITUDE_SCALE, ALTITUDE_LIMIT)
}

/// Decode a 6.4 altitude.
pub fn decode_altitude(raw: u32) -> f64 {
    decode_offset(raw, ALTITUDE_SCALE, ALTITUDE_LIMIT)
}

/// Encode a non-negative rate (3.6).
pub fn encode_rate(value: f64) -> Result<u32> {
    if !value.is_finite() || !(0.0..=RATE_LIMIT).contains(&value) {
        return Err(FrameError::OutOfRange {
            value,
            min: 0.0,
            max: RATE_LIMIT,
        });
    }
    Ok((value * RATE_SCALE).round() as u32)
}

/// Decode a 3.6 rate.
pub fn decode_rate(raw: u32) -> f64 {
    f64::from(raw) / RATE_SCALE
}
