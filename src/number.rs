//! Canonical numbers as the engine understands them.
//!
//! Values are kept to 18 significant digits and must stay below 1E47 in
//! magnitude. A string is a *canonical number* when formatting its numeric
//! value reproduces the string exactly; only those collate numerically.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error as ThisError;

use crate::constants::{YDB_NUMERIC_MAX_EXP, YDB_NUMERIC_PRECISION};

/// Result magnitude reached 1E47
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
#[error("numeric overflow")]
pub struct Overflow;

/// Smallest exponent kept; anything smaller reads as zero
const MIN_EXP: i32 = -(YDB_NUMERIC_MAX_EXP + YDB_NUMERIC_PRECISION as i32);

/// A decimal `mantissa * 10^exponent`, normalised so the mantissa has no
/// trailing zeros and zero has a single representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Number {
    negative: bool,
    mantissa: u64,
    exponent: i32,
}

fn digit_count(mut n: u128) -> i32 {
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

impl Number {
    pub const ZERO: Number = Number {
        negative: false,
        mantissa: 0,
        exponent: 0,
    };

    /// Round an arbitrary-width decimal down to the kept precision
    fn normalize(negative: bool, mut mantissa: u128, mut exponent: i32) -> Result<Number, Overflow> {
        if mantissa == 0 {
            return Ok(Number::ZERO);
        }
        let digits = digit_count(mantissa);
        let excess = digits - YDB_NUMERIC_PRECISION as i32;
        if excess > 0 {
            let scale = 10u128.pow(excess as u32);
            let rem = mantissa % scale;
            mantissa /= scale;
            if rem * 2 >= scale {
                mantissa += 1;
            }
            exponent += excess;
        }
        while mantissa != 0 && mantissa % 10 == 0 {
            mantissa /= 10;
            exponent += 1;
        }
        if exponent + digit_count(mantissa) - 1 >= YDB_NUMERIC_MAX_EXP {
            return Err(Overflow);
        }
        if exponent + digit_count(mantissa) - 1 < MIN_EXP {
            return Ok(Number::ZERO);
        }
        Ok(Number {
            negative,
            mantissa: mantissa as u64,
            exponent,
        })
    }

    pub fn from_i64(value: i64) -> Number {
        Number::normalize(value < 0, value.unsigned_abs() as u128, 0).unwrap_or(Number::ZERO)
    }

    /// Numeric interpretation of a string.
    ///
    /// Leading signs are folded, then digits with an optional fraction and
    /// exponent are read up to the first character that does not fit. A
    /// string with no numeric prefix is zero.
    pub fn parse(input: &[u8]) -> Result<Number, Overflow> {
        let mut pos = 0;
        let mut negative = false;
        while pos < input.len() && (input[pos] == b'+' || input[pos] == b'-') {
            negative ^= input[pos] == b'-';
            pos += 1;
        }

        let mut mantissa: u128 = 0;
        let mut exponent: i32 = 0;
        let mut kept = 0;
        let mut seen_digit = false;
        let mut seen_point = false;
        while pos < input.len() {
            let c = input[pos];
            if c.is_ascii_digit() {
                seen_digit = true;
                let d = (c - b'0') as u128;
                if kept < 21 {
                    if mantissa != 0 || d != 0 {
                        kept += 1;
                    }
                    mantissa = mantissa * 10 + d;
                    if seen_point {
                        exponent -= 1;
                    }
                } else if !seen_point {
                    exponent += 1;
                }
            } else if c == b'.' && !seen_point {
                seen_point = true;
            } else {
                break;
            }
            pos += 1;
        }

        if seen_digit && pos < input.len() && input[pos] == b'E' {
            let mut epos = pos + 1;
            let mut eneg = false;
            if epos < input.len() && (input[epos] == b'+' || input[epos] == b'-') {
                eneg = input[epos] == b'-';
                epos += 1;
            }
            let mut evalue: i32 = 0;
            let mut edigits = false;
            while epos < input.len() && input[epos].is_ascii_digit() {
                evalue = evalue.saturating_mul(10).saturating_add((input[epos] - b'0') as i32);
                edigits = true;
                epos += 1;
            }
            if edigits {
                exponent = if eneg {
                    exponent.saturating_sub(evalue)
                } else {
                    exponent.saturating_add(evalue)
                };
            }
        }

        Number::normalize(negative, mantissa, exponent)
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Position of the most significant digit (0 for units)
    fn magnitude(&self) -> i32 {
        self.exponent + digit_count(self.mantissa as u128) - 1
    }

    /// Sum rounded to the kept precision
    pub fn add(&self, other: &Number) -> Result<Number, Overflow> {
        if self.is_zero() {
            return Ok(*other);
        }
        if other.is_zero() {
            return Ok(*self);
        }
        // Align both operands to a common exponent with a few guard digits
        let top = self.magnitude().max(other.magnitude());
        let target = self
            .exponent
            .min(other.exponent)
            .max(top - YDB_NUMERIC_PRECISION as i32 - 3);
        let scale = |n: &Number| -> i128 {
            let shift = n.exponent - target;
            let m = n.mantissa as i128;
            let v = if shift >= 0 {
                m * 10i128.pow(shift as u32)
            } else {
                // Digits shifted past i128 lie below the kept precision
                10i128
                    .checked_pow((-shift) as u32)
                    .map_or(0, |divisor| m / divisor)
            };
            if n.negative {
                -v
            } else {
                v
            }
        };
        let sum = scale(self) + scale(other);
        Number::normalize(sum < 0, sum.unsigned_abs(), target)
    }

    /// Whether `input` is exactly the canonical spelling of its value
    pub fn is_canonical(input: &[u8]) -> bool {
        if input.is_empty() || input.len() > 64 {
            return false;
        }
        match Number::parse(input) {
            Ok(n) => n.to_string().as_bytes() == input,
            Err(_) => false,
        }
    }

    /// Parse only if the input is canonical
    pub fn canonical(input: &[u8]) -> Option<Number> {
        if Number::is_canonical(input) {
            Number::parse(input).ok()
        } else {
            None
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let digits = self.mantissa.to_string();
        let mut out = String::with_capacity(digits.len() + 4);
        if self.negative {
            out.push('-');
        }
        if self.exponent >= 0 {
            out.push_str(&digits);
            out.extend(std::iter::repeat('0').take(self.exponent as usize));
        } else {
            let point = digits.len() as i32 + self.exponent;
            if point > 0 {
                out.push_str(&digits[..point as usize]);
                out.push('.');
                out.push_str(&digits[point as usize..]);
            } else {
                out.push('.');
                out.extend(std::iter::repeat('0').take((-point) as usize));
                out.push_str(&digits);
            }
        }
        f.write_str(&out)
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        let sign = |n: &Number| -> i8 {
            if n.is_zero() {
                0
            } else if n.negative {
                -1
            } else {
                1
            }
        };
        match sign(self).cmp(&sign(other)) {
            Ordering::Equal => {}
            ord => return ord,
        }
        if self.is_zero() {
            return Ordering::Equal;
        }
        // Compare magnitudes, then mantissas padded to the same width
        let pad = |n: &Number| -> u128 {
            let width = digit_count(n.mantissa as u128);
            n.mantissa as u128 * 10u128.pow((YDB_NUMERIC_PRECISION as i32 - width) as u32)
        };
        let abs = self
            .magnitude()
            .cmp(&other.magnitude())
            .then_with(|| pad(self).cmp(&pad(other)));
        if self.negative {
            abs.reverse()
        } else {
            abs
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Add `increment` to the numeric value of `current`, returning the
/// canonical result string
pub fn increment(current: &[u8], increment: &[u8]) -> Result<String, Overflow> {
    let base = Number::parse(current)?;
    let delta = Number::parse(increment)?;
    Ok(base.add(&delta)?.to_string())
}
