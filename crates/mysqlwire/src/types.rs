//! Column metadata and value codecs.
//!
//! Resultset rows arrive in one of two encodings:
//! - text (COM_QUERY): every non-NULL value is a length-encoded string
//! - binary (COM_STMT_EXECUTE): a NULL bitmap followed by type-specific
//!   fixed-width or length-prefixed values
//!
//! Statement parameters always use the binary encoding.

#![allow(clippy::cast_possible_truncation)]

use std::str::FromStr;

use mysqlwire_core::{Date, DateTime, Error, Result, Time, Value};

use crate::protocol::{Deserialize, PacketReader, PacketWriter, Serialize, charset, malformed};

/// MySQL field type codes (`MYSQL_TYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    /// Internal to the server; never sent by MySQL 5.x+, decoded like DATE.
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from a byte. Unknown codes decode as strings.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Int24
                | FieldType::Year
        )
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }

    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::Time
                | FieldType::DateTime
                | FieldType::Timestamp
                | FieldType::NewDate
                | FieldType::Timestamp2
                | FieldType::DateTime2
                | FieldType::Time2
        )
    }

    /// The SQL-level type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp | FieldType::Timestamp2 => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time | FieldType::Time2 => "TIME",
            FieldType::DateTime | FieldType::DateTime2 => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flags in resultset metadata.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    pub const ON_UPDATE_NOW: u16 = 8192;
    pub const NUM: u16 = 32768;
}

/// Column definition (field metadata) from a resultset header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Catalog name (always "def")
    pub catalog: String,
    pub schema: String,
    /// Table name or alias
    pub table: String,
    pub org_table: String,
    /// Column name or alias
    pub name: String,
    pub org_name: String,
    /// Character set number; 63 means binary
    pub charset: u16,
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// A column with empty naming metadata, mostly useful for building
    /// resultsets by hand.
    pub fn new(name: impl Into<String>, column_type: FieldType) -> Self {
        Self {
            catalog: "def".to_string(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: name.into(),
            org_name: String::new(),
            charset: u16::from(charset::DEFAULT_CHARSET),
            column_length: 0,
            column_type,
            flags: 0,
            decimals: 0,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_charset(mut self, charset: u16) -> Self {
        self.charset = charset;
        self
    }

    #[must_use]
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    #[must_use]
    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    /// Whether string-like values of this column are raw bytes.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        self.charset == charset::BINARY as u16
    }
}

/// Column definition packet (protocol 4.1):
/// - six length-encoded strings: catalog, schema, table, org_table, name, org_name
/// - length of the fixed-size fields (always 0x0c)
/// - charset (2), column_length (4), type (1), flags (2), decimals (1)
/// - 2 filler bytes
impl Deserialize<'_> for ColumnDef {
    fn deserialize(r: &mut PacketReader<'_>) -> Result<Self> {
        let catalog = r.read_lenenc_string()?;
        let schema = r.read_lenenc_string()?;
        let table = r.read_lenenc_string()?;
        let org_table = r.read_lenenc_string()?;
        let name = r.read_lenenc_string()?;
        let org_name = r.read_lenenc_string()?;
        let fixed_len = r.read_lenenc_count()?;
        if fixed_len < 0x0c {
            return Err(malformed(format!(
                "column definition fixed-length block is {fixed_len} bytes"
            )));
        }
        let charset = r.read_u16_le()?;
        let column_length = r.read_u32_le()?;
        let column_type = FieldType::from_u8(r.read_u8()?);
        let flags = r.read_u16_le()?;
        let decimals = r.read_u8()?;
        // Filler (and any extension of the fixed block) is ignored.
        r.read_rest();
        Ok(ColumnDef {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }
}

/// Server-side encoding, used to script resultsets in tests.
impl Serialize for ColumnDef {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_lenenc_string(&self.catalog);
        w.write_lenenc_string(&self.schema);
        w.write_lenenc_string(&self.table);
        w.write_lenenc_string(&self.org_table);
        w.write_lenenc_string(&self.name);
        w.write_lenenc_string(&self.org_name);
        w.write_lenenc_int(0x0c);
        w.write_u16_le(self.charset);
        w.write_u32_le(self.column_length);
        w.write_u8(self.column_type as u8);
        w.write_u16_le(self.flags);
        w.write_u8(self.decimals);
        w.write_zeros(2);
    }
}

fn bad_value(column: &ColumnDef, text: &[u8]) -> Error {
    malformed(format!(
        "invalid {} value '{}' in column '{}'",
        column.column_type.name(),
        String::from_utf8_lossy(text),
        column.name
    ))
}

/// String-like payloads: bytes for binary columns, text otherwise.
/// Text that is not valid UTF-8 falls back to bytes.
fn string_or_bytes(column: &ColumnDef, data: &[u8]) -> Value {
    if column.is_binary() {
        return Value::Bytes(data.to_vec());
    }
    match std::str::from_utf8(data) {
        Ok(s) => Value::String(s.to_owned()),
        Err(_) => Value::Bytes(data.to_vec()),
    }
}

fn parse_text<T: FromStr>(column: &ColumnDef, data: &[u8]) -> Result<T> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| bad_value(column, data))
}

/// Decode one non-NULL text-protocol value.
pub fn decode_text_value(column: &ColumnDef, data: &[u8]) -> Result<Value> {
    let value = match column.column_type {
        t if t.is_integer() => {
            if column.is_unsigned() {
                Value::UInt64(parse_text(column, data)?)
            } else {
                Value::Int64(parse_text(column, data)?)
            }
        }
        FieldType::Float => Value::Float32(parse_text(column, data)?),
        FieldType::Double => Value::Float64(parse_text(column, data)?),
        FieldType::Date | FieldType::NewDate => Value::Date(parse_text(column, data)?),
        FieldType::DateTime
        | FieldType::DateTime2
        | FieldType::Timestamp
        | FieldType::Timestamp2 => Value::DateTime(parse_text::<DateTime>(column, data)?),
        FieldType::Time | FieldType::Time2 => Value::Time(parse_text::<Time>(column, data)?),
        FieldType::Null => Value::Null,
        FieldType::Bit | FieldType::Geometry => Value::Bytes(data.to_vec()),
        _ => string_or_bytes(column, data),
    };
    Ok(value)
}

/// Decode a text-protocol row: one length-encoded string per column,
/// 0xFB for NULL.
pub fn decode_text_row(columns: &[ColumnDef], payload: &[u8]) -> Result<Vec<Value>> {
    let mut r = PacketReader::new(payload);
    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        if r.peek() == Some(0xFB) {
            r.skip(1)?;
            values.push(Value::Null);
            continue;
        }
        let data = r.read_lenenc_bytes()?;
        values.push(decode_text_value(column, data)?);
    }
    if !r.is_empty() {
        return Err(malformed(format!(
            "{} trailing bytes after text row",
            r.remaining()
        )));
    }
    Ok(values)
}

/// Binary rows offset the NULL bitmap by two bits.
const BINARY_ROW_BITMAP_OFFSET: usize = 2;

fn null_bitmap_len(count: usize, offset: usize) -> usize {
    (count + offset).div_ceil(8)
}

fn is_null_in_bitmap(bitmap: &[u8], index: usize, offset: usize) -> bool {
    let bit = index + offset;
    bitmap
        .get(bit / 8)
        .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
}

/// Decode a binary-protocol row: 0x00 header, NULL bitmap, then values for
/// the non-NULL columns.
pub fn decode_binary_row(columns: &[ColumnDef], payload: &[u8]) -> Result<Vec<Value>> {
    let mut r = PacketReader::new(payload);
    let header = r.read_u8()?;
    if header != 0x00 {
        return Err(malformed(format!("bad binary row header 0x{header:02x}")));
    }
    let bitmap = r.read_bytes(null_bitmap_len(columns.len(), BINARY_ROW_BITMAP_OFFSET))?;
    let mut values = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        if is_null_in_bitmap(bitmap, i, BINARY_ROW_BITMAP_OFFSET) {
            values.push(Value::Null);
        } else {
            values.push(decode_binary_value(column, &mut r)?);
        }
    }
    if !r.is_empty() {
        return Err(malformed(format!(
            "{} trailing bytes after binary row",
            r.remaining()
        )));
    }
    Ok(values)
}

/// Decode one non-NULL binary-protocol value.
pub fn decode_binary_value(column: &ColumnDef, r: &mut PacketReader<'_>) -> Result<Value> {
    let unsigned = column.is_unsigned();
    let value = match column.column_type {
        FieldType::Tiny => {
            let v = r.read_u8()?;
            if unsigned {
                Value::UInt64(u64::from(v))
            } else {
                Value::Int64(i64::from(v as i8))
            }
        }
        FieldType::Short | FieldType::Year => {
            let v = r.read_u16_le()?;
            if unsigned {
                Value::UInt64(u64::from(v))
            } else {
                Value::Int64(i64::from(v as i16))
            }
        }
        // MEDIUMINT travels as 4 bytes.
        FieldType::Long | FieldType::Int24 => {
            let v = r.read_u32_le()?;
            if unsigned {
                Value::UInt64(u64::from(v))
            } else {
                Value::Int64(i64::from(v as i32))
            }
        }
        FieldType::LongLong => {
            let v = r.read_u64_le()?;
            if unsigned {
                Value::UInt64(v)
            } else {
                Value::Int64(v as i64)
            }
        }
        FieldType::Float => Value::Float32(r.read_f32_le()?),
        FieldType::Double => Value::Float64(r.read_f64_le()?),
        FieldType::Date | FieldType::NewDate => Value::Date(decode_binary_datetime(r)?.date()),
        FieldType::DateTime
        | FieldType::DateTime2
        | FieldType::Timestamp
        | FieldType::Timestamp2 => Value::DateTime(decode_binary_datetime(r)?),
        FieldType::Time | FieldType::Time2 => Value::Time(decode_binary_time(r)?),
        FieldType::Null => Value::Null,
        FieldType::Bit | FieldType::Geometry => Value::Bytes(r.read_lenenc_bytes()?.to_vec()),
        _ => string_or_bytes(column, r.read_lenenc_bytes()?),
    };
    Ok(value)
}

/// Binary DATE/DATETIME/TIMESTAMP: a length byte of 0, 4, 7 or 11, then
/// year (2), month, day, hour, minute, second, microsecond (4).
fn decode_binary_datetime(r: &mut PacketReader<'_>) -> Result<DateTime> {
    let len = r.read_u8()?;
    let mut dt = DateTime::new(0, 0, 0, 0, 0, 0, 0);
    if !matches!(len, 0 | 4 | 7 | 11) {
        return Err(malformed(format!("invalid binary datetime length {len}")));
    }
    if len >= 4 {
        dt.year = r.read_u16_le()?;
        dt.month = r.read_u8()?;
        dt.day = r.read_u8()?;
    }
    if len >= 7 {
        dt.hour = r.read_u8()?;
        dt.minute = r.read_u8()?;
        dt.second = r.read_u8()?;
    }
    if len == 11 {
        dt.microsecond = r.read_u32_le()?;
    }
    Ok(dt)
}

/// Binary TIME: a length byte of 0, 8 or 12, then sign, days (4), hour,
/// minute, second, microsecond (4).
fn decode_binary_time(r: &mut PacketReader<'_>) -> Result<Time> {
    let len = r.read_u8()?;
    match len {
        0 => Ok(Time::default()),
        8 | 12 => {
            let negative = r.read_u8()? != 0;
            let days = r.read_u32_le()?;
            let hours = r.read_u8()?;
            let minutes = r.read_u8()?;
            let seconds = r.read_u8()?;
            let micros = if len == 12 { r.read_u32_le()? } else { 0 };
            let total_hours = u64::from(days) * 24 + u64::from(hours);
            Time::try_from_parts(negative, total_hours, minutes, seconds, micros)
                .ok_or_else(|| malformed(format!("binary time of {days} days is out of range")))
        }
        _ => Err(malformed(format!("invalid binary time length {len}"))),
    }
}

/// Flag set in the second byte of a parameter type when the value is
/// unsigned.
pub const PARAM_UNSIGNED_FLAG: u8 = 0x80;

/// The (type, flag) pair announced for a statement parameter.
pub fn binary_param_type(value: &Value) -> (FieldType, u8) {
    match value {
        Value::Null => (FieldType::Null, 0),
        Value::Int64(_) => (FieldType::LongLong, 0),
        Value::UInt64(_) => (FieldType::LongLong, PARAM_UNSIGNED_FLAG),
        Value::Float32(_) => (FieldType::Float, 0),
        Value::Float64(_) => (FieldType::Double, 0),
        Value::String(_) => (FieldType::VarChar, 0),
        Value::Bytes(_) => (FieldType::Blob, 0),
        Value::Date(_) => (FieldType::Date, 0),
        Value::DateTime(_) => (FieldType::DateTime, 0),
        Value::Time(_) => (FieldType::Time, 0),
    }
}

/// Write the binary encoding of a non-NULL parameter. NULL writes nothing;
/// it is carried by the NULL bitmap.
pub fn encode_binary_value(w: &mut PacketWriter, value: &Value) {
    match value {
        Value::Null => {}
        Value::Int64(v) => w.write_u64_le(*v as u64),
        Value::UInt64(v) => w.write_u64_le(*v),
        Value::Float32(v) => w.write_f32_le(*v),
        Value::Float64(v) => w.write_f64_le(*v),
        Value::String(s) => w.write_lenenc_string(s),
        Value::Bytes(b) => w.write_lenenc_bytes(b),
        Value::Date(d) => {
            if d.is_zero() {
                w.write_u8(0);
            } else {
                w.write_u8(4);
                w.write_u16_le(d.year);
                w.write_u8(d.month);
                w.write_u8(d.day);
            }
        }
        Value::DateTime(dt) => encode_binary_datetime(w, dt),
        Value::Time(t) => encode_binary_time(w, t),
    }
}

fn encode_binary_datetime(w: &mut PacketWriter, dt: &DateTime) {
    let len = if dt.microsecond != 0 {
        11
    } else if dt.has_time() {
        7
    } else if dt.date() != Date::new(0, 0, 0) {
        4
    } else {
        0
    };
    w.write_u8(len);
    if len >= 4 {
        w.write_u16_le(dt.year);
        w.write_u8(dt.month);
        w.write_u8(dt.day);
    }
    if len >= 7 {
        w.write_u8(dt.hour);
        w.write_u8(dt.minute);
        w.write_u8(dt.second);
    }
    if len == 11 {
        w.write_u32_le(dt.microsecond);
    }
}

fn encode_binary_time(w: &mut PacketWriter, t: &Time) {
    if t.is_zero() {
        w.write_u8(0);
        return;
    }
    let micros = t.microseconds();
    w.write_u8(if micros != 0 { 12 } else { 8 });
    w.write_u8(u8::from(t.is_negative()));
    w.write_u32_le(t.days());
    w.write_u8(t.hours());
    w.write_u8(t.minutes());
    w.write_u8(t.seconds());
    if micros != 0 {
        w.write_u32_le(micros);
    }
}

/// Build the NULL bitmap for statement parameters (no offset).
pub(crate) fn param_null_bitmap(params: &[Value]) -> Vec<u8> {
    let mut bitmap = vec![0u8; null_bitmap_len(params.len(), 0)];
    for (i, param) in params.iter().enumerate() {
        if param.is_null() {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    bitmap
}

/// Server-side row encoders, used to script resultsets in tests.
#[cfg(test)]
pub(crate) mod encode {
    use super::*;

    pub fn text_row(values: &[Option<&str>]) -> Vec<u8> {
        let mut w = PacketWriter::new();
        for value in values {
            match value {
                Some(s) => w.write_lenenc_string(s),
                None => w.write_u8(0xFB),
            }
        }
        w.into_bytes()
    }

    pub fn binary_row(values: &[Value]) -> Vec<u8> {
        let mut w = PacketWriter::new();
        w.write_u8(0x00);
        let mut bitmap = vec![0u8; null_bitmap_len(values.len(), BINARY_ROW_BITMAP_OFFSET)];
        for (i, value) in values.iter().enumerate() {
            if value.is_null() {
                let bit = i + BINARY_ROW_BITMAP_OFFSET;
                bitmap[bit / 8] |= 1 << (bit % 8);
            }
        }
        w.write_bytes(&bitmap);
        for value in values {
            encode_binary_value(&mut w, value);
        }
        w.into_bytes()
    }
}
