// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
#![allow(clippy::as_conversions)]

use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;
use std::str::FromStr;

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Error produced when a string is not a decimal number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid number {0:?}")]
pub struct ParseNumberError(pub String);

// mantissa * 10^exponent, with trailing zeros moved into the exponent.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Decimal {
    mantissa: BigInt,
    exponent: i64,
}

impl Decimal {
    fn parse(s: &str) -> Result<Decimal, ParseNumberError> {
        let err = || ParseNumberError(s.to_string());

        let (negative, rest) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let (coefficient, exponent) = match rest.find(['e', 'E']) {
            Some(idx) => {
                let e = &rest[idx + 1..];
                let e = e.strip_prefix('+').unwrap_or(e);
                (&rest[..idx], e.parse::<i64>().map_err(|_| err())?)
            }
            None => (rest, 0),
        };

        let (int_part, frac_part) = match coefficient.split_once('.') {
            Some((i, f)) => (i, f),
            None => (coefficient, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }

        let mut digits = String::with_capacity(int_part.len() + frac_part.len());
        digits.push_str(int_part);
        digits.push_str(frac_part);

        let exponent = exponent
            .checked_sub(frac_part.len() as i64)
            .ok_or_else(err)?;

        let trimmed = digits.trim_end_matches('0');
        let trailing = (digits.len() - trimmed.len()) as i64;
        let trimmed = trimmed.trim_start_matches('0');
        if trimmed.is_empty() {
            return Ok(Decimal {
                mantissa: BigInt::zero(),
                exponent: 0,
            });
        }

        let magnitude = BigInt::parse_bytes(trimmed.as_bytes(), 10).ok_or_else(err)?;
        Ok(Decimal {
            mantissa: if negative { -magnitude } else { magnitude },
            exponent: exponent.checked_add(trailing).ok_or_else(err)?,
        })
    }

    fn digits(&self) -> i64 {
        self.mantissa.magnitude().to_string().len() as i64
    }

    // Position of the most significant digit.
    fn magnitude(&self) -> i64 {
        self.digits().saturating_add(self.exponent)
    }

    fn canonical(&self) -> String {
        if self.mantissa.is_zero() {
            return "0".to_string();
        }
        let sign = if self.mantissa.is_negative() { "-" } else { "" };
        let digits = self.mantissa.magnitude().to_string();
        let n = digits.len() as i64;

        if self.exponent >= 0 {
            if self.exponent <= 21 {
                return format!("{sign}{digits}{}", "0".repeat(self.exponent as usize));
            }
        } else if -self.exponent < n {
            let (int, frac) = digits.split_at((n + self.exponent) as usize);
            return format!("{sign}{int}.{frac}");
        } else if -self.exponent - n <= 6 {
            let zeros = "0".repeat((-self.exponent - n) as usize);
            return format!("{sign}0.{zeros}{digits}");
        }

        let (first, rest) = digits.split_at(1);
        let e = self.exponent + n - 1;
        if rest.is_empty() {
            format!("{sign}{first}e{e}")
        } else {
            format!("{sign}{first}.{rest}e{e}")
        }
    }
}

fn is_json_number(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    if b.first() == Some(&b'-') {
        i += 1;
    }

    let digits = |i: &mut usize| {
        let start = *i;
        while *i < b.len() && b[*i].is_ascii_digit() {
            *i += 1;
        }
        *i - start
    };

    match b.get(i) {
        Some(b'0') => i += 1,
        Some(c) if c.is_ascii_digit() => {
            digits(&mut i);
        }
        _ => return false,
    }
    if b.get(i) == Some(&b'.') {
        i += 1;
        if digits(&mut i) == 0 {
            return false;
        }
    }
    if matches!(b.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(b.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        if digits(&mut i) == 0 {
            return false;
        }
    }
    i == b.len()
}

/// An arbitrary-precision decimal number.
///
/// The number keeps the text it was written with (when that text is valid
/// JSON) so that printing a literal reproduces it exactly. Comparison and
/// divisibility are exact and never go through floating point.
#[derive(Clone)]
pub struct Number {
    text: Rc<str>,
    value: Rc<Decimal>,
}

impl Number {
    /// The textual form of the number.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_zero(&self) -> bool {
        self.value.mantissa.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.value.mantissa.is_negative()
    }

    /// Converts a finite float. Returns None for NaN and infinities.
    pub fn from_f64(v: f64) -> Option<Number> {
        if !v.is_finite() {
            return None;
        }
        Number::from_str(&format!("{v}")).ok()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.text.parse::<f64>().ok().filter(|f| f.is_finite())
    }

    pub fn as_i64(&self) -> Option<i64> {
        let d = &self.value;
        if d.exponent < 0 || d.exponent > 18 {
            return if d.mantissa.is_zero() { Some(0) } else { None };
        }
        let scaled = &d.mantissa * BigInt::from(10u64.pow(d.exponent as u32));
        i64::try_from(scaled).ok()
    }

    /// Whether `self` is an integral multiple of `m`. A zero divisor never
    /// divides anything.
    pub fn is_multiple_of(&self, m: &Number) -> bool {
        let (a, b) = (&*self.value, &*m.value);
        if b.mantissa.is_zero() {
            return false;
        }
        if a.mantissa.is_zero() {
            return true;
        }

        let modulus = BigInt::from_biguint(Sign::Plus, b.mantissa.magnitude().clone());
        if a.exponent >= b.exponent {
            let k = BigInt::from(a.exponent - b.exponent);
            let scale = BigInt::from(10).modpow(&k, &modulus);
            let rem = (a.mantissa.magnitude() % modulus.magnitude()) * scale.magnitude();
            (rem % modulus.magnitude()).is_zero()
        } else {
            // The mantissa carries no trailing zeros, so it cannot absorb the
            // remaining power of ten.
            false
        }
    }

    /// The number as a JSON number.
    pub fn to_json(&self) -> serde_json::Value {
        match serde_json::Number::from_str(&self.text) {
            Ok(n) => serde_json::Value::Number(n),
            Err(_) => serde_json::Value::String(self.text.to_string()),
        }
    }
}

impl FromStr for Number {
    type Err = ParseNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::parse(s.trim())?;
        let text = if is_json_number(s) {
            s.to_string()
        } else {
            value.canonical()
        };
        Ok(Number {
            text: text.into(),
            value: Rc::new(value),
        })
    }
}

impl Number {
    fn from_integer(n: BigInt) -> Number {
        let text = n.to_string();
        let mut mantissa = n;
        let mut exponent = 0;
        let ten = BigInt::from(10);
        while !mantissa.is_zero() && (&mantissa % &ten).is_zero() {
            mantissa /= &ten;
            exponent += 1;
        }
        Number {
            text: text.into(),
            value: Rc::new(Decimal { mantissa, exponent }),
        }
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Number::from_integer(BigInt::from(n))
    }
}

impl From<u64> for Number {
    fn from(n: u64) -> Self {
        Number::from_integer(BigInt::from(n))
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&*self.value, &*other.value);
        let (sa, sb) = (a.mantissa.sign(), b.mantissa.sign());
        if sa != sb {
            return sa.cmp(&sb);
        }
        if sa == Sign::NoSign {
            return Ordering::Equal;
        }

        let magnitude = match a.magnitude().cmp(&b.magnitude()) {
            Ordering::Equal => {
                // Same order of magnitude, so the exponent gap is bounded by the
                // digit counts.
                let e = a.exponent.min(b.exponent);
                let scale = |d: &Decimal| {
                    d.mantissa.magnitude() * num_bigint::BigUint::from(10u32).pow((d.exponent - e) as u32)
                };
                scale(a).cmp(&scale(b))
            }
            o => o,
        };

        if sa == Sign::Minus {
            magnitude.reverse()
        } else {
            magnitude
        }
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

impl Debug for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match serde_json::Number::from_str(&self.text) {
            Ok(n) => n.serialize(serializer),
            Err(_) => serializer.serialize_str(&self.text),
        }
    }
}

struct NumberVisitor;

impl<'de> Visitor<'de> for NumberVisitor {
    type Value = Number;

    fn expecting(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("a number")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Number::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Number::from(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Number::from_f64(v).ok_or_else(|| E::custom(format!("{v} is not a finite number")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Number::from_str(v).map_err(E::custom)
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        // serde_json hands arbitrary precision numbers over as a single entry map.
        match map.next_key::<String>()? {
            Some(k) if k == "$serde_json::private::Number" => {
                let v: String = map.next_value()?;
                Number::from_str(&v).map_err(de::Error::custom)
            }
            _ => Err(de::Error::custom("expected a number")),
        }
    }
}

impl<'de> Deserialize<'de> for Number {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(NumberVisitor)
    }
}
