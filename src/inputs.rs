//! Loose numeric inputs for asset values and metal prices.
//!
//! Builders accept plain integers, floats and strings alongside `Decimal`.
//! [`IntoZakatDecimal::into_amount`] adds the field name to conversion errors
//! and refuses negative amounts, so constructors need no extra checks.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::types::ZakatError;

pub trait IntoZakatDecimal: Sized {
    fn into_zakat_decimal(self) -> Result<Decimal, ZakatError>;

    /// Converts a monetary amount, naming `field` in any error.
    fn into_amount(self, field: &str) -> Result<Decimal, ZakatError> {
        let amount = self.into_zakat_decimal().map_err(|e| match e {
            ZakatError::Validation { reason, .. } => ZakatError::validation(field, reason),
            other => other,
        })?;
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ZakatError::validation(field, format!("must be non-negative, got {}", amount)));
        }
        Ok(amount)
    }
}

impl IntoZakatDecimal for Decimal {
    fn into_zakat_decimal(self) -> Result<Decimal, ZakatError> {
        Ok(self)
    }
}

impl IntoZakatDecimal for &Decimal {
    fn into_zakat_decimal(self) -> Result<Decimal, ZakatError> {
        Ok(*self)
    }
}

macro_rules! decimal_input {
    (exact: $($t:ty),*) => {
        $(impl IntoZakatDecimal for $t {
            fn into_zakat_decimal(self) -> Result<Decimal, ZakatError> {
                Ok(Decimal::from(self))
            }
        })*
    };
    (float: $($t:ty => $conv:ident),*) => {
        $(impl IntoZakatDecimal for $t {
            fn into_zakat_decimal(self) -> Result<Decimal, ZakatError> {
                Decimal::$conv(self)
                    .ok_or_else(|| ZakatError::validation("value", format!("{} has no decimal form", self)))
            }
        })*
    };
}

decimal_input!(exact: u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);
// NaN and infinities yield None.
decimal_input!(float: f32 => from_f32, f64 => from_f64);

impl IntoZakatDecimal for &str {
    fn into_zakat_decimal(self) -> Result<Decimal, ZakatError> {
        let trimmed = self.trim();
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map_err(|_| ZakatError::validation("value", format!("'{}' is not a number", self)))
    }
}

impl IntoZakatDecimal for String {
    fn into_zakat_decimal(self) -> Result<Decimal, ZakatError> {
        self.as_str().into_zakat_decimal()
    }
}
