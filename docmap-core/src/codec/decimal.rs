//! Exact conversion between [`Decimal`] and BSON decimal128.
//!
//! Decimal128 values are handled in their binary integer decimal (BID)
//! layout: bit 127 is the sign, bits 126..113 the biased exponent and bits
//! 112..0 the coefficient. Only the canonical finite form is produced or
//! accepted.

use bson::{Bson, Decimal128};
use rust_decimal::Decimal;

use crate::{
    codec::{CodecContext, TypedCodec, unexpected},
    error::{OdmError, OdmResult},
    options::{DecimalStorage, MapperOptions},
};

const EXPONENT_BIAS: i32 = 6176;
const EXPONENT_MASK: u128 = 0x3FFF;
const COEFFICIENT_BITS: u32 = 113;
const COEFFICIENT_MASK: u128 = (1 << COEFFICIENT_BITS) - 1;
const MAX_COEFFICIENT: u128 = 9_999_999_999_999_999_999_999_999_999_999_999;
const MAX_SCALE: u32 = 28;
const MANTISSA_LIMIT: u128 = 1 << 96;

fn conversion(message: impl Into<String>) -> OdmError {
    OdmError::conversion("Decimal128", "Decimal", message)
}

pub fn to_decimal128(value: &Decimal) -> Decimal128 {
    let mantissa = value.mantissa();
    let exponent = (EXPONENT_BIAS - value.scale() as i32) as u128;
    let mut bits = (exponent & EXPONENT_MASK) << COEFFICIENT_BITS | mantissa.unsigned_abs();
    if value.is_sign_negative() {
        bits |= 1 << 127;
    }
    Decimal128::from_bytes(bits.to_le_bytes())
}

pub fn from_decimal128(value: &Decimal128) -> OdmResult<Decimal> {
    let bits = u128::from_le_bytes(value.bytes());
    if (bits >> 125) & 0b11 == 0b11 {
        return Err(conversion("infinities, NaN and non-canonical values have no decimal form"));
    }
    let negative = bits >> 127 == 1;
    let exponent = ((bits >> COEFFICIENT_BITS) & EXPONENT_MASK) as i32 - EXPONENT_BIAS;
    let mut coefficient = bits & COEFFICIENT_MASK;
    if coefficient > MAX_COEFFICIENT {
        return Err(conversion("coefficient exceeds 34 digits"));
    }

    let mut scale: u32 = 0;
    if exponent > 0 {
        for _ in 0..exponent {
            coefficient = coefficient
                .checked_mul(10)
                .filter(|scaled| *scaled < MANTISSA_LIMIT)
                .ok_or_else(|| conversion(format!("{value} is out of range")))?;
        }
    } else {
        scale = exponent.unsigned_abs();
    }
    // Drop trailing zeros until the value fits the 96-bit mantissa and 28-digit scale.
    while (scale > MAX_SCALE || coefficient >= MANTISSA_LIMIT) && scale > 0 && coefficient % 10 == 0 {
        coefficient /= 10;
        scale -= 1;
    }
    if scale > MAX_SCALE || coefficient >= MANTISSA_LIMIT {
        return Err(conversion(format!("{value} cannot be represented without losing precision")));
    }

    let signed = if negative { -(coefficient as i128) } else { coefficient as i128 };
    let mut decimal = Decimal::try_from_i128_with_scale(signed, scale)
        .map_err(|err| conversion(err.to_string()))?;
    if negative && coefficient == 0 {
        decimal.set_sign_negative(true);
    }
    Ok(decimal)
}

/// Stores a decimal according to the configured policy.
pub fn decimal_to_bson(value: &Decimal, options: &MapperOptions) -> Bson {
    match options.decimal_storage {
        DecimalStorage::Decimal128 => Bson::Decimal128(to_decimal128(value)),
        DecimalStorage::String => Bson::String(value.to_string()),
    }
}

/// Reads a decimal from any numeric or string form.
pub fn decimal_from_bson(value: &Bson) -> OdmResult<Decimal> {
    match value {
        Bson::Decimal128(decimal) => from_decimal128(decimal),
        Bson::String(text) => text
            .parse::<Decimal>()
            .or_else(|_| Decimal::from_scientific(text))
            .map_err(|err| OdmError::conversion("String", "Decimal", format!("'{text}': {err}"))),
        Bson::Int32(number) => Ok(Decimal::from(*number)),
        Bson::Int64(number) => Ok(Decimal::from(*number)),
        Bson::Double(number) => Decimal::try_from(*number)
            .map_err(|err| OdmError::conversion("Double", "Decimal", err.to_string())),
        other => Err(unexpected(other, "Decimal")),
    }
}

pub(crate) struct DecimalCodec;

impl TypedCodec for DecimalCodec {
    type Value = Decimal;

    fn encode(&self, value: &Decimal, ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(decimal_to_bson(value, ctx.options))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<Decimal> {
        decimal_from_bson(value)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn bid(negative: bool, exponent: i32, coefficient: u128) -> Decimal128 {
        let mut bits = ((exponent + EXPONENT_BIAS) as u128) << COEFFICIENT_BITS | coefficient;
        if negative {
            bits |= 1 << 127;
        }
        Decimal128::from_bytes(bits.to_le_bytes())
    }

    #[test]
    fn test_encoding_keeps_coefficient_and_scale() {
        let value: Decimal = "-123.4500".parse().unwrap();
        assert_eq!(to_decimal128(&value).bytes(), bid(true, -4, 1_234_500).bytes());
    }

    #[test]
    fn test_positive_exponent_is_expanded() {
        let decoded = from_decimal128(&bid(false, 3, 12)).unwrap();
        assert_eq!(decoded, Decimal::from(12_000));
    }

    #[test]
    fn test_excess_scale_is_reduced_when_digits_are_zero() {
        let decoded = from_decimal128(&bid(false, -30, 500)).unwrap();
        assert_eq!(decoded, Decimal::new(5, 28));

        assert!(from_decimal128(&bid(false, -30, 501)).unwrap_err().is_conversion());
    }

    #[test]
    fn test_special_values_are_rejected() {
        let infinity = Decimal128::from_bytes((0x7800_u128 << 112).to_le_bytes());
        assert!(from_decimal128(&infinity).is_err());
    }

    #[test]
    fn test_other_numeric_forms_are_accepted() {
        assert_eq!(decimal_from_bson(&Bson::Int32(7)).unwrap(), Decimal::from(7));
        assert_eq!(decimal_from_bson(&Bson::String("1.5e2".into())).unwrap(), Decimal::from(150));
        assert!(decimal_from_bson(&Bson::Boolean(true)).is_err());
    }
}
