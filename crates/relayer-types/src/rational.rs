// Copyright 2023 Ring Exchange Network Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Conversions between on-chain `U256` integers, `BigInt` and `BigRational`.
//!
//! All price and fee math runs on exact rationals. The only place a float is
//! allowed to appear is the n-th root of a rate product, and the result of
//! that is immediately pinned back to a rational through its fixed-precision
//! decimal rendering so every platform agrees on the value downstream.

use ethers::types::U256;
use num_bigint::{BigInt, Sign};
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

/// Number of fractional decimal digits kept when re-rationalizing a float.
pub const FLOAT_DECIMAL_DIGITS: usize = 10;

/// Returns `10^exp` as a big integer.
pub fn pow10(exp: u32) -> BigInt {
    BigInt::from(10u32).pow(exp)
}

/// Converts an on-chain unsigned 256-bit integer into a `BigInt`.
pub fn u256_to_bigint(value: U256) -> BigInt {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    BigInt::from_bytes_be(Sign::Plus, &bytes)
}

/// Converts a `BigInt` back into a `U256`.
///
/// Negative values clamp to zero and values above `2^256 - 1` clamp to
/// `U256::MAX`; residual accounting never produces either in practice.
pub fn bigint_to_u256(value: &BigInt) -> U256 {
    if value.is_negative() {
        return U256::zero();
    }
    let (_, bytes) = value.to_bytes_be();
    if bytes.len() > 32 {
        return U256::MAX;
    }
    U256::from_big_endian(&bytes)
}

/// Lifts a `U256` into an exact rational.
pub fn rat_from_u256(value: U256) -> BigRational {
    BigRational::from_integer(u256_to_bigint(value))
}

/// Builds the rational `numer / denom` out of two on-chain integers.
pub fn ratio_of(numer: U256, denom: U256) -> BigRational {
    if denom.is_zero() {
        return BigRational::zero();
    }
    BigRational::new(u256_to_bigint(numer), u256_to_bigint(denom))
}

/// Rounds a rational to the nearest integer, half away from zero.
pub fn rat_round_to_bigint(value: &BigRational) -> BigInt {
    value.round().to_integer()
}

/// Rounds a rational to the nearest integer and converts it to `U256`.
pub fn rat_to_u256_round(value: &BigRational) -> U256 {
    bigint_to_u256(&rat_round_to_bigint(value))
}

/// Projects a rational onto an IEEE-754 double.
pub fn rat_to_f64(value: &BigRational) -> Option<f64> {
    value.to_f64()
}

/// Pins a float back to a rational through its decimal rendering with
/// [`FLOAT_DECIMAL_DIGITS`] fractional digits.
///
/// Going through the decimal string rather than the exact binary mantissa
/// keeps the rate-reduction factor identical across platforms and keeps its
/// denominator small enough for the downstream variance test.
pub fn rat_from_f64_dec(value: f64) -> BigRational {
    if !value.is_finite() {
        return BigRational::zero();
    }
    let rendered = format!("{:.*}", FLOAT_DECIMAL_DIGITS, value);
    let negative = rendered.starts_with('-');
    let unsigned = rendered.trim_start_matches('-');
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let mut digits = String::with_capacity(int_part.len() + frac_part.len());
    digits.push_str(int_part);
    digits.push_str(frac_part);
    let mut numer = BigInt::parse_bytes(digits.as_bytes(), 10).unwrap_or_default();
    if negative {
        numer = -numer;
    }
    BigRational::new(numer, pow10(frac_part.len() as u32))
}

/// Parses a plain decimal string such as `"573.137"` into a rational.
///
/// Returns `None` for anything that is not a finite decimal number.
pub fn rat_from_decimal_str(text: &str) -> Option<BigRational> {
    let trimmed = text.trim();
    let negative = trimmed.starts_with('-');
    let unsigned = trimmed.trim_start_matches('-');
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut digits = String::with_capacity(int_part.len() + frac_part.len());
    digits.push_str(int_part);
    digits.push_str(frac_part);
    let mut numer = BigInt::parse_bytes(digits.as_bytes(), 10)?;
    if negative {
        numer = -numer;
    }
    Some(BigRational::new(numer, pow10(frac_part.len() as u32)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    #[test]
    fn u256_round_trips_through_bigint() {
        let values = [
            U256::zero(),
            U256::one(),
            U256::from(1_000_000_007u64),
            U256::MAX,
        ];
        for v in values {
            assert_eq!(bigint_to_u256(&u256_to_bigint(v)), v);
        }
    }

    #[test]
    fn negative_bigint_clamps_to_zero() {
        assert_eq!(bigint_to_u256(&BigInt::from(-5)), U256::zero());
    }

    #[test]
    fn ratio_of_zero_denominator_is_zero() {
        assert!(ratio_of(U256::from(3), U256::zero()).is_zero());
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        let half = BigRational::new(BigInt::from(1), BigInt::from(2));
        assert_eq!(rat_round_to_bigint(&half), BigInt::from(1));
        let below = BigRational::new(BigInt::from(49), BigInt::from(100));
        assert_eq!(rat_round_to_bigint(&below), BigInt::from(0));
    }

    #[test]
    fn decimal_pinning_is_exact_for_short_fractions() {
        let half = rat_from_f64_dec(0.5);
        assert_eq!(half, BigRational::new(BigInt::from(1), BigInt::from(2)));
        let one = rat_from_f64_dec(1.0);
        assert!(one.is_one());
    }

    #[test]
    fn decimal_pinning_keeps_ten_digits() {
        let v = rat_from_f64_dec(std::f64::consts::FRAC_1_SQRT_2);
        // 0.7071067812 after rounding to ten fractional digits.
        assert_eq!(
            v,
            BigRational::new(BigInt::from(7_071_067_812u64), pow10(10))
        );
    }

    #[test]
    fn decimal_strings_parse_exactly() {
        assert_eq!(
            rat_from_decimal_str("573.137").unwrap(),
            BigRational::new(BigInt::from(573_137), BigInt::from(1_000))
        );
        assert_eq!(
            rat_from_decimal_str("-0.5").unwrap(),
            BigRational::new(BigInt::from(-1), BigInt::from(2))
        );
        assert_eq!(
            rat_from_decimal_str(".25").unwrap(),
            BigRational::new(BigInt::from(1), BigInt::from(4))
        );
        assert!(rat_from_decimal_str("").is_none());
        assert!(rat_from_decimal_str("abc").is_none());
    }

    #[test]
    fn non_finite_floats_pin_to_zero() {
        assert!(rat_from_f64_dec(f64::NAN).is_zero());
        assert!(rat_from_f64_dec(f64::INFINITY).is_zero());
    }
}
