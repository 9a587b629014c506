//! MySQL packet reading utilities.
//!
//! Every read checks the remaining length first; a short buffer is a
//! protocol error rather than a panic.

#![allow(clippy::cast_possible_truncation)]

use mysqlwire_core::Result;
use mysqlwire_core::error::ProtocolErrorKind;

use super::{malformed, protocol_error};

/// A cursor over one reassembled message.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(malformed(format!(
                "unexpected end of packet: need {} bytes at offset {}, {} left",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u24_le(&mut self) -> Result<u32> {
        let [a, b, c] = self.read_array()?;
        Ok(u32::from(a) | (u32::from(b) << 8) | (u32::from(c) << 16))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Read a length-encoded integer.
    ///
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    ///
    /// 0xFB (NULL) and 0xFF are not integers; callers that accept NULL check
    /// for it with [`PacketReader::peek`] first.
    pub fn read_lenenc_int(&mut self) -> Result<u64> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Ok(u64::from(first)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            0xFB | 0xFF => Err(malformed(format!(
                "invalid length-encoded integer prefix 0x{first:02x}"
            ))),
        }
    }

    /// Read a length-encoded integer that must fit in `usize`.
    pub fn read_lenenc_count(&mut self) -> Result<usize> {
        narrow_count(self.read_lenenc_int()?)
    }

    pub fn read_lenenc_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_lenenc_count()?;
        self.read_bytes(len)
    }

    pub fn read_lenenc_string(&mut self) -> Result<String> {
        self.read_lenenc_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read up to and consume a NUL terminator.
    pub fn read_null_bytes(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let Some(end) = rest.iter().position(|&b| b == 0) else {
            return Err(malformed("missing NUL terminator"));
        };
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    pub fn read_null_string(&mut self) -> Result<String> {
        self.read_null_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read a fixed-length string.
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        self.read_bytes(len)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read the remaining data (EOF-terminated).
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        rest
    }

    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }
}

/// Convert a wire count to the platform size type `T`.
fn narrow_count<T: TryFrom<u64>>(value: u64) -> Result<T> {
    T::try_from(value).map_err(|_| {
        protocol_error(
            ProtocolErrorKind::CountOverflow,
            format!(
                "length-encoded count {value} does not fit in {}",
                std::any::type_name::<T>()
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysqlwire_core::Error;

    #[test]
    fn test_read_fixed_width() {
        let data = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10, 0x11, 0x12,
        ];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16_le().unwrap(), 0x0302);
        assert_eq!(reader.read_u24_le().unwrap(), 0x06_0504);
        assert_eq!(reader.read_u32_le().unwrap(), 0x0a09_0807);
        assert_eq!(reader.read_u64_le().unwrap(), 0x1211_100f_0e0d_0c0b);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_boundaries() {
        let data = [0xFF, 0xFF, 0x00, 0x00, 0x00, 0x80];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_u16_le().unwrap(), u16::MAX);
        assert_eq!(
            i32::from_le_bytes([0x00, 0x00, 0x00, 0x80]),
            reader.read_u32_le().unwrap() as i32
        );

        let min = i64::MIN.to_le_bytes();
        let mut reader = PacketReader::new(&min);
        assert_eq!(reader.read_u64_le().unwrap() as i64, i64::MIN);
    }

    #[test]
    fn test_short_buffer_is_protocol_error() {
        let mut reader = PacketReader::new(&[0x01, 0x02]);
        let err = reader.read_u32_le().unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::Malformed));
        // A failed read does not consume anything.
        assert_eq!(reader.remaining(), 2);
    }

    #[test]
    fn test_read_lenenc_int_tiers() {
        let cases: [(&[u8], u64); 7] = [
            (&[0x00], 0),
            (&[0xFA], 250),
            (&[0xFC, 0xFB, 0x00], 251),
            (&[0xFC, 0xFF, 0xFF], 65_535),
            (&[0xFD, 0x00, 0x00, 0x01], 65_536),
            (&[0xFD, 0xFF, 0xFF, 0xFF], 0xFF_FFFF),
            (
                &[0xFE, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
                0x0100_0000,
            ),
        ];
        for (bytes, expected) in cases {
            let mut reader = PacketReader::new(bytes);
            assert_eq!(reader.read_lenenc_int().unwrap(), expected, "{bytes:?}");
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn test_read_lenenc_rejects_null_and_reserved() {
        assert!(PacketReader::new(&[0xFB]).read_lenenc_int().is_err());
        assert!(PacketReader::new(&[0xFF]).read_lenenc_int().is_err());
        assert!(PacketReader::new(&[0xFC, 0x01]).read_lenenc_int().is_err());
    }

    #[test]
    fn test_count_must_fit_size_type() {
        let err = narrow_count::<u32>(u64::from(u32::MAX) + 1).unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::CountOverflow));
        assert!(err.to_string().contains("u32"));
        assert_eq!(narrow_count::<u32>(u64::from(u32::MAX)).unwrap(), u32::MAX);
        assert!(narrow_count::<u16>(70_000).is_err());

        let data = [0xFE, 0, 0, 0, 0, 1, 0, 0, 0];
        let count = PacketReader::new(&data).read_lenenc_count();
        if cfg!(target_pointer_width = "64") {
            assert_eq!(u64::try_from(count.unwrap()).unwrap(), 1u64 << 32);
        } else {
            assert_eq!(
                count.unwrap_err().protocol_kind(),
                Some(ProtocolErrorKind::CountOverflow)
            );
        }
    }

    #[test]
    fn test_lenenc_bytes_longer_than_buffer() {
        let data = [0x05, b'a', b'b'];
        let err = PacketReader::new(&data).read_lenenc_bytes().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_read_strings() {
        let data = b"\x05helloworld\0rest";
        let mut reader = PacketReader::new(data);
        assert_eq!(reader.read_lenenc_string().unwrap(), "hello");
        assert_eq!(reader.read_null_string().unwrap(), "world");
        assert_eq!(reader.read_rest_string(), "rest");
        assert!(reader.is_empty());
        assert_eq!(reader.read_rest(), b"");
    }

    #[test]
    fn test_null_string_requires_terminator() {
        let mut reader = PacketReader::new(b"abc");
        assert!(reader.read_null_string().is_err());
    }

    #[test]
    fn test_fixed_string_and_skip() {
        let mut reader = PacketReader::new(b"#28000xyz");
        reader.skip(1).unwrap();
        assert_eq!(reader.read_string(5).unwrap(), "28000");
        assert_eq!(reader.peek(), Some(b'x'));
        assert!(reader.skip(4).is_err());
    }
}
