//! Small reusable validators shared by configuration loading and program compilation.
//!
//! Each validator returns `Err(&'static str)` describing the violated rule so callers
//! can wrap it into the error type that fits their context.

use std::ops::RangeInclusive;

/// Axis letters understood by the controller (channels A through H).
pub const AXIS_LETTERS: RangeInclusive<char> = 'A'..='H';

/// Validates that a string names exactly one controller axis letter (case-insensitive).
///
/// # Returns
///
/// * `Ok(letter)` with the upper-cased letter.
/// * `Err(&'static str)` if the string is empty, longer than one character, or out of A-H.
pub fn is_valid_axis_letter(value: &str) -> Result<char, &'static str> {
    let mut chars = value.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => {
            let upper = c.to_ascii_uppercase();
            if AXIS_LETTERS.contains(&upper) {
                Ok(upper)
            } else {
                Err("Axis letter must be between A and H")
            }
        }
        (None, _) => Err("Axis letter cannot be empty"),
        _ => Err("Axis letter must be a single character"),
    }
}

/// Validates that a conversion factor is finite and strictly positive.
pub fn is_positive_factor(value: f64) -> Result<(), &'static str> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err("Conversion factor must be a finite number greater than 0")
    }
}

/// Validates that a value is finite (no NaN or infinities reach the wire).
pub fn is_finite(value: f64) -> Result<(), &'static str> {
    if value.is_finite() {
        Ok(())
    } else {
        Err("Value must be finite")
    }
}

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}
