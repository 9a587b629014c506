//! Dynamically-typed column values.
//!
//! `Value` is a closed sum over the kinds the wire protocol can carry.
//! Equality is type-exact: `Value::Int64(42) != Value::UInt64(42)`. Reading a
//! value as another kind goes through [`conversion`], a table keyed by the
//! stored and requested kinds.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, TypeError};

/// A single column or parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Signed 64-bit integer
    Int64(i64),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// IEEE-754 single precision
    Float32(f32),
    /// IEEE-754 double precision
    Float64(f64),
    /// Text in the connection character set
    String(String),
    /// Binary-collation string, blob or bit data
    Bytes(Vec<u8>),
    /// Calendar date
    Date(Date),
    /// Date plus time of day
    DateTime(DateTime),
    /// Signed duration
    Time(Time),
}

/// The tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    Bytes,
    Date,
    DateTime,
    Time,
}

/// How a stored kind may be read as a requested kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Same kind
    Exact,
    /// Signed to unsigned, only when the value is not negative
    NonNegative,
    /// Unsigned to signed, only when the value is at most `i64::MAX`
    FitsSigned,
    /// Lossless float widening
    Widen,
    /// Not convertible
    Never,
}

/// The convertibility table.
pub fn conversion(stored: ValueKind, requested: ValueKind) -> Conversion {
    match (stored, requested) {
        (s, r) if s == r => Conversion::Exact,
        (ValueKind::Int64, ValueKind::UInt64) => Conversion::NonNegative,
        (ValueKind::UInt64, ValueKind::Int64) => Conversion::FitsSigned,
        (ValueKind::Float32, ValueKind::Float64) => Conversion::Widen,
        _ => Conversion::Never,
    }
}

impl ValueKind {
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "NULL",
            ValueKind::Int64 => "INT64",
            ValueKind::UInt64 => "UINT64",
            ValueKind::Float32 => "FLOAT32",
            ValueKind::Float64 => "FLOAT64",
            ValueKind::String => "STRING",
            ValueKind::Bytes => "BYTES",
            ValueKind::Date => "DATE",
            ValueKind::DateTime => "DATETIME",
            ValueKind::Time => "TIME",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Types that can be read out of a [`Value`] of exactly their own kind.
///
/// Cross-kind reads are resolved by [`conversion`] before `from_exact` runs.
pub trait FromValue: Sized {
    const KIND: ValueKind;

    fn from_exact(value: &Value) -> Option<Self>;
}

impl Value {
    pub const fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Int64(_) => ValueKind::Int64,
            Value::UInt64(_) => ValueKind::UInt64,
            Value::Float32(_) => ValueKind::Float32,
            Value::Float64(_) => ValueKind::Float64,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Date(_) => ValueKind::Date,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Time(_) => ValueKind::Time,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the stored kind is exactly `T`'s kind.
    pub fn is<T: FromValue>(&self) -> bool {
        self.kind() == T::KIND
    }

    /// Whether [`Value::get`] would succeed for `T`.
    pub fn is_convertible_to<T: FromValue>(&self) -> bool {
        self.convert(T::KIND).is_some()
    }

    /// Read the value as `T`, applying the convertibility table.
    pub fn get<T: FromValue>(&self) -> Option<T> {
        self.convert(T::KIND)
            .and_then(|value| T::from_exact(value.as_ref()))
    }

    /// Like [`Value::get`] but reports the mismatch.
    pub fn try_get<T: FromValue>(&self) -> Result<T, Error> {
        self.get::<T>().ok_or_else(|| {
            Error::Type(TypeError {
                expected: T::KIND.name(),
                actual: self.kind().name().to_string(),
                column: None,
            })
        })
    }

    fn convert(&self, requested: ValueKind) -> Option<Cow<'_, Value>> {
        match (conversion(self.kind(), requested), self) {
            (Conversion::Exact, _) => Some(Cow::Borrowed(self)),
            (Conversion::NonNegative, Value::Int64(v)) => {
                u64::try_from(*v).ok().map(|v| Cow::Owned(Value::UInt64(v)))
            }
            (Conversion::FitsSigned, Value::UInt64(v)) => {
                i64::try_from(*v).ok().map(|v| Cow::Owned(Value::Int64(v)))
            }
            (Conversion::Widen, Value::Float32(v)) => {
                Some(Cow::Owned(Value::Float64(f64::from(*v))))
            }
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.get()
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.get()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.get()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_bytes()),
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

macro_rules! impl_from_value {
    ($ty:ty, $kind:ident, $pat:pat => $out:expr) => {
        impl FromValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn from_exact(value: &Value) -> Option<Self> {
                match value {
                    $pat => Some($out),
                    _ => None,
                }
            }
        }
    };
}

impl_from_value!(i64, Int64, Value::Int64(v) => *v);
impl_from_value!(u64, UInt64, Value::UInt64(v) => *v);
impl_from_value!(f32, Float32, Value::Float32(v) => *v);
impl_from_value!(f64, Float64, Value::Float64(v) => *v);
impl_from_value!(String, String, Value::String(v) => v.clone());
impl_from_value!(Vec<u8>, Bytes, Value::Bytes(v) => v.clone());
impl_from_value!(Date, Date, Value::Date(v) => *v);
impl_from_value!(DateTime, DateTime, Value::DateTime(v) => *v);
impl_from_value!(Time, Time, Value::Time(v) => *v);

// Conversion implementations
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(i64::from(v))
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int64(i64::from(v))
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int64(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt64(u64::from(v))
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::UInt64(u64::from(v))
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt64(u64::from(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Date> for Value {
    fn from(v: Date) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Time> for Value {
    fn from(v: Time) -> Self {
        Value::Time(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("<NULL>"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Bytes(v) => {
                f.write_str("0x")?;
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::Date(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "{v}"),
            Value::Time(v) => write!(f, "{v}"),
        }
    }
}

/// A calendar date. Zero components are allowed (`0000-00-00`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    pub const fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// All components zero.
    pub const fn is_zero(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }

    /// A real calendar day in the range 0000-01-01 through 9999-12-31.
    pub fn is_valid(&self) -> bool {
        self.year <= 9999
            && (1..=12).contains(&self.month)
            && self.day >= 1
            && self.day <= days_in_month(self.year, self.month)
    }
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) => 29,
        2 => 28,
        _ => 31,
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// A date with a time of day and microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl DateTime {
    pub const fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        microsecond: u32,
    ) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            microsecond,
        }
    }

    pub const fn date(&self) -> Date {
        Date::new(self.year, self.month, self.day)
    }

    pub const fn has_time(&self) -> bool {
        self.hour != 0 || self.minute != 0 || self.second != 0 || self.microsecond != 0
    }
}

impl From<Date> for DateTime {
    fn from(d: Date) -> Self {
        Self::new(d.year, d.month, d.day, 0, 0, 0, 0)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}:{:02}.{:06}",
            self.date(),
            self.hour,
            self.minute,
            self.second,
            self.microsecond
        )
    }
}

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

/// A signed duration with microsecond precision, as carried by TIME columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Time {
    micros: i64,
}

impl Time {
    pub const fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub fn from_parts(negative: bool, hours: u16, minutes: u8, seconds: u8, micros: u32) -> Self {
        let magnitude = i64::from(hours) * MICROS_PER_HOUR
            + i64::from(minutes) * MICROS_PER_MINUTE
            + i64::from(seconds) * MICROS_PER_SECOND
            + i64::from(micros);
        Self {
            micros: if negative { -magnitude } else { magnitude },
        }
    }

    /// Like [`Time::from_parts`] for an unbounded hour count, as read off
    /// the wire. `None` when the magnitude does not fit in microseconds.
    pub fn try_from_parts(
        negative: bool,
        hours: u64,
        minutes: u8,
        seconds: u8,
        micros: u32,
    ) -> Option<Self> {
        let magnitude = i64::try_from(hours)
            .ok()?
            .checked_mul(MICROS_PER_HOUR)?
            .checked_add(i64::from(minutes) * MICROS_PER_MINUTE)?
            .checked_add(i64::from(seconds) * MICROS_PER_SECOND)?
            .checked_add(i64::from(micros))?;
        Some(Self {
            micros: if negative { -magnitude } else { magnitude },
        })
    }

    pub const fn as_micros(&self) -> i64 {
        self.micros
    }

    pub const fn is_negative(&self) -> bool {
        self.micros < 0
    }

    pub const fn is_zero(&self) -> bool {
        self.micros == 0
    }

    /// Whole days of the magnitude.
    pub fn days(&self) -> u32 {
        (self.micros.unsigned_abs() / MICROS_PER_DAY as u64) as u32
    }

    /// Total hours of the magnitude, days included.
    pub fn total_hours(&self) -> u64 {
        self.micros.unsigned_abs() / MICROS_PER_HOUR as u64
    }

    /// Hours within the day.
    pub fn hours(&self) -> u8 {
        (self.total_hours() % 24) as u8
    }

    pub fn minutes(&self) -> u8 {
        ((self.micros.unsigned_abs() / MICROS_PER_MINUTE as u64) % 60) as u8
    }

    pub fn seconds(&self) -> u8 {
        ((self.micros.unsigned_abs() / MICROS_PER_SECOND as u64) % 60) as u8
    }

    pub fn microseconds(&self) -> u32 {
        (self.micros.unsigned_abs() % MICROS_PER_SECOND as u64) as u32
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:02}:{:02}:{:02}.{:06}",
            if self.is_negative() { "-" } else { "" },
            self.total_hours(),
            self.minutes(),
            self.seconds(),
            self.microseconds()
        )
    }
}

fn temporal_error(expected: &'static str, actual: &str) -> Error {
    Error::Type(TypeError {
        expected,
        actual: actual.to_string(),
        column: None,
    })
}

fn parse_num<T: FromStr>(s: &str, expected: &'static str, whole: &str) -> Result<T, Error> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(temporal_error(expected, whole));
    }
    s.parse().map_err(|_| temporal_error(expected, whole))
}

/// Fractional seconds, right-padded to six digits.
fn parse_micros(s: &str, expected: &'static str, whole: &str) -> Result<u32, Error> {
    if s.len() > 6 {
        return Err(temporal_error(expected, whole));
    }
    let digits: u32 = parse_num(s, expected, whole)?;
    Ok(digits * 10u32.pow(6 - s.len() as u32))
}

fn split_seconds<'a>(
    s: &'a str,
    expected: &'static str,
    whole: &str,
) -> Result<(&'a str, u32), Error> {
    match s.split_once('.') {
        Some((secs, frac)) => Ok((secs, parse_micros(frac, expected, whole)?)),
        None => Ok((s, 0)),
    }
}

impl FromStr for Date {
    type Err = Error;

    /// Parse `YYYY-MM-DD`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(temporal_error("DATE", s));
        };
        Ok(Date::new(
            parse_num(y, "DATE", s)?,
            parse_num(m, "DATE", s)?,
            parse_num(d, "DATE", s)?,
        ))
    }
}

impl FromStr for DateTime {
    type Err = Error;

    /// Parse `YYYY-MM-DD[ HH:MM:SS[.ffffff]]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (date_part, time_part) = match s.split_once(' ') {
            Some((d, t)) => (d, Some(t)),
            None => (s, None),
        };
        let date: Date = date_part
            .parse()
            .map_err(|_| temporal_error("DATETIME", s))?;
        let mut dt = DateTime::from(date);
        if let Some(t) = time_part {
            let mut parts = t.splitn(3, ':');
            let (Some(h), Some(m), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
                return Err(temporal_error("DATETIME", s));
            };
            let (secs, micros) = split_seconds(rest, "DATETIME", s)?;
            dt.hour = parse_num(h, "DATETIME", s)?;
            dt.minute = parse_num(m, "DATETIME", s)?;
            dt.second = parse_num(secs, "DATETIME", s)?;
            dt.microsecond = micros;
        }
        Ok(dt)
    }
}

impl FromStr for Time {
    type Err = Error;

    /// Parse `[-]HHH:MM:SS[.ffffff]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let mut parts = body.splitn(3, ':');
        let (Some(h), Some(m), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(temporal_error("TIME", s));
        };
        let (secs, micros) = split_seconds(rest, "TIME", s)?;
        Time::try_from_parts(
            negative,
            parse_num(h, "TIME", s)?,
            parse_num(m, "TIME", s)?,
            parse_num(secs, "TIME", s)?,
            micros,
        )
        .ok_or_else(|| temporal_error("TIME", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_type_exact() {
        assert_ne!(Value::from(42i64), Value::from(42u64));
        assert_ne!(Value::from(1.0f32), Value::from(1.0f64));
        assert_eq!(Value::from(42i64), Value::Int64(42));
        assert_eq!(Value::from("abc"), Value::String("abc".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_signed_unsigned_conversion() {
        let v = Value::from(42i64);
        assert_eq!(v.get::<u64>(), Some(42));
        assert_eq!(v.get::<i64>(), Some(42));

        assert_eq!(Value::from(-1i64).get::<u64>(), None);
        assert_eq!(Value::from(u64::MAX).get::<i64>(), None);
        assert_eq!(
            Value::from(i64::MAX as u64).get::<i64>(),
            Some(i64::MAX)
        );
    }

    #[test]
    fn test_float_widening() {
        let v = Value::from(1.5f32);
        assert_eq!(v.get::<f64>(), Some(1.5));
        assert_eq!(v.get::<f32>(), Some(1.5));
        assert_eq!(Value::from(1.5f64).get::<f32>(), None);
    }

    #[test]
    fn test_conversion_table() {
        assert_eq!(
            conversion(ValueKind::Int64, ValueKind::Int64),
            Conversion::Exact
        );
        assert_eq!(
            conversion(ValueKind::Int64, ValueKind::UInt64),
            Conversion::NonNegative
        );
        assert_eq!(
            conversion(ValueKind::UInt64, ValueKind::Int64),
            Conversion::FitsSigned
        );
        assert_eq!(
            conversion(ValueKind::Float32, ValueKind::Float64),
            Conversion::Widen
        );
        assert_eq!(
            conversion(ValueKind::Float64, ValueKind::Float32),
            Conversion::Never
        );
        assert_eq!(
            conversion(ValueKind::Int64, ValueKind::Float64),
            Conversion::Never
        );
        assert_eq!(
            conversion(ValueKind::Null, ValueKind::Int64),
            Conversion::Never
        );
    }

    #[test]
    fn test_is_and_convertible() {
        let v = Value::from(7i64);
        assert!(v.is::<i64>());
        assert!(!v.is::<u64>());
        assert!(v.is_convertible_to::<u64>());
        assert!(!v.is_convertible_to::<String>());
        assert!(!Value::Null.is_convertible_to::<i64>());
    }

    #[test]
    fn test_try_get_reports_kinds() {
        let err = Value::from("x").try_get::<i64>().unwrap_err();
        assert_eq!(err.to_string(), "Type error: expected INT64, found STRING");
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "<NULL>");
        assert_eq!(Value::from(-3i64).to_string(), "-3");
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "0xdead");
        assert_eq!(Value::from(Date::new(2010, 9, 3)).to_string(), "2010-09-03");
        assert_eq!(
            Value::from(DateTime::new(2010, 9, 3, 10, 30, 59, 231_800)).to_string(),
            "2010-09-03 10:30:59.231800"
        );
        assert_eq!(
            Value::from(Time::from_parts(false, 230, 30, 59, 231_800)).to_string(),
            "230:30:59.231800"
        );
        assert_eq!(
            Time::from_parts(true, 1, 2, 3, 0).to_string(),
            "-01:02:03.000000"
        );
    }

    #[test]
    fn test_time_components() {
        let t = Time::from_parts(false, 230, 30, 59, 231_800);
        assert_eq!(t.days(), 9);
        assert_eq!(t.hours(), 14);
        assert_eq!(t.minutes(), 30);
        assert_eq!(t.seconds(), 59);
        assert_eq!(t.microseconds(), 231_800);

        let neg = Time::from_parts(true, 0, 0, 1, 0);
        assert!(neg.is_negative());
        assert_eq!(neg.as_micros(), -1_000_000);
    }

    #[test]
    fn test_date_validity() {
        assert!(Date::new(2020, 2, 29).is_valid());
        assert!(!Date::new(2019, 2, 29).is_valid());
        assert!(!Date::new(1900, 2, 29).is_valid());
        assert!(Date::new(2000, 2, 29).is_valid());
        assert!(!Date::new(2020, 13, 1).is_valid());
        assert!(!Date::new(10000, 1, 1).is_valid());
        assert!(Date::new(0, 0, 0).is_zero());
        assert!(!Date::new(0, 0, 0).is_valid());
    }

    #[test]
    fn test_parse_temporal() {
        assert_eq!("2010-09-03".parse::<Date>().unwrap(), Date::new(2010, 9, 3));
        assert_eq!(
            "2010-09-03 10:30:59.2318".parse::<DateTime>().unwrap(),
            DateTime::new(2010, 9, 3, 10, 30, 59, 231_800)
        );
        assert_eq!(
            "2010-09-03 10:30:59".parse::<DateTime>().unwrap(),
            DateTime::new(2010, 9, 3, 10, 30, 59, 0)
        );
        assert_eq!(
            "0000-00-00 00:00:00".parse::<DateTime>().unwrap(),
            DateTime::new(0, 0, 0, 0, 0, 0, 0)
        );
        assert_eq!(
            "-838:59:59.000000".parse::<Time>().unwrap(),
            Time::from_parts(true, 838, 59, 59, 0)
        );
        assert!("2010-9".parse::<Date>().is_err());
        assert!("10:aa:00".parse::<Time>().is_err());
        assert_eq!(
            "3000:00:00".parse::<Time>().unwrap().total_hours(),
            3000
        );
        assert!("2010-09-03 10:30:59.1234567".parse::<DateTime>().is_err());
    }

    #[test]
    fn test_parse_time_hours_overflow() {
        let err = "4294967295:00:00".parse::<Time>().unwrap_err();
        assert!(matches!(err, Error::Type(ref e) if e.expected == "TIME"));
        assert!("-99999999999999999999:00:00".parse::<Time>().is_err());

        assert_eq!(Time::try_from_parts(false, u64::MAX, 0, 0, 0), None);
        assert_eq!(Time::try_from_parts(false, 2_562_048, 0, 0, 0), None);
        assert_eq!(
            Time::try_from_parts(true, 838, 59, 59, 0),
            Some(Time::from_parts(true, 838, 59, 59, 0))
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let v = Value::from(DateTime::new(2020, 1, 2, 3, 4, 5, 6));
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
