//! Prepared statement (binary protocol) messages.
//!
//! - COM_STMT_PREPARE: prepare a SQL statement
//! - COM_STMT_EXECUTE: execute with binary-encoded parameters
//! - COM_STMT_CLOSE: deallocate (the server sends no reply)

use mysqlwire_core::{Result, Value};

use super::{Command, Deserialize, PacketReader, PacketWriter, Serialize, malformed};
use crate::types::{binary_param_type, encode_binary_value, param_null_bitmap};

/// COM_STMT_EXECUTE cursor flags: no cursor.
pub const CURSOR_TYPE_NO_CURSOR: u8 = 0x00;

#[derive(Debug, Clone, Copy)]
pub struct ComStmtPrepare<'a> {
    pub sql: &'a str,
}

impl Serialize for ComStmtPrepare<'_> {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u8(Command::StmtPrepare as u8);
        w.write_bytes(self.sql.as_bytes());
    }
}

/// COM_STMT_PREPARE OK response header.
///
/// Followed by `num_params` parameter definitions and `num_columns` column
/// definitions (no EOF markers with DEPRECATE_EOF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
    pub warnings: u16,
}

/// Layout:
/// - status: 0x00
/// - statement_id: 4 bytes
/// - num_columns: 2 bytes
/// - num_params: 2 bytes
/// - reserved: 1 byte
/// - warning_count: 2 bytes
impl Deserialize<'_> for StmtPrepareOk {
    fn deserialize(r: &mut PacketReader<'_>) -> Result<Self> {
        let status = r.read_u8()?;
        if status != 0x00 {
            return Err(malformed(format!(
                "bad COM_STMT_PREPARE response status 0x{status:02x}"
            )));
        }
        let statement_id = r.read_u32_le()?;
        let num_columns = r.read_u16_le()?;
        let num_params = r.read_u16_le()?;
        r.skip(1)?;
        // Servers omit the warning count when it would be the last field of
        // a short packet.
        let warnings = if r.remaining() >= 2 { r.read_u16_le()? } else { 0 };
        Ok(StmtPrepareOk {
            statement_id,
            num_columns,
            num_params,
            warnings,
        })
    }
}

impl Serialize for StmtPrepareOk {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u8(0x00);
        w.write_u32_le(self.statement_id);
        w.write_u16_le(self.num_columns);
        w.write_u16_le(self.num_params);
        w.write_u8(0x00);
        w.write_u16_le(self.warnings);
    }
}

/// COM_STMT_EXECUTE with every parameter bound inline.
#[derive(Debug, Clone, Copy)]
pub struct ComStmtExecute<'a> {
    pub statement_id: u32,
    pub params: &'a [Value],
}

/// Layout:
/// - 0x17, statement_id (4), flags (1), iteration_count (4) = 1
/// - when there are parameters: NULL bitmap, new_params_bound = 1,
///   (type, flag) per parameter, then the non-NULL values
impl Serialize for ComStmtExecute<'_> {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u8(Command::StmtExecute as u8);
        w.write_u32_le(self.statement_id);
        w.write_u8(CURSOR_TYPE_NO_CURSOR);
        w.write_u32_le(1);

        if self.params.is_empty() {
            return;
        }

        w.write_bytes(&param_null_bitmap(self.params));
        w.write_u8(1);
        for param in self.params {
            let (field_type, flag) = binary_param_type(param);
            w.write_u8(field_type as u8);
            w.write_u8(flag);
        }
        for param in self.params {
            encode_binary_value(w, param);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ComStmtClose {
    pub statement_id: u32,
}

impl Serialize for ComStmtClose {
    fn serialize(&self, w: &mut PacketWriter) {
        w.write_u8(Command::StmtClose as u8);
        w.write_u32_le(self.statement_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysqlwire_core::{Date, DateTime, Time};

    const EXECUTE_HEADER: [u8; 10] = [0x17, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];

    fn execute(statement_id: u32, params: &[Value]) -> Vec<u8> {
        ComStmtExecute {
            statement_id,
            params,
        }
        .to_payload()
    }

    #[test]
    fn test_prepare_layout() {
        assert_eq!(
            ComStmtPrepare { sql: "SELECT ?" }.to_payload(),
            b"\x16SELECT ?".to_vec()
        );
    }

    #[test]
    fn test_prepare_ok() {
        let payload = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00];
        let ok = StmtPrepareOk::from_payload(&payload).unwrap();
        assert_eq!(
            ok,
            StmtPrepareOk {
                statement_id: 1,
                num_columns: 2,
                num_params: 3,
                warnings: 0,
            }
        );
    }

    #[test]
    fn test_prepare_ok_rejects_bad_status() {
        let payload = [0x01, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00];
        assert!(StmtPrepareOk::from_payload(&payload).is_err());
        assert!(StmtPrepareOk::from_payload(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_close_layout() {
        assert_eq!(
            ComStmtClose { statement_id: 1 }.to_payload(),
            vec![0x19, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_execute_no_params() {
        assert_eq!(execute(1, &[]), EXECUTE_HEADER.to_vec());
    }

    #[test]
    fn test_execute_int64() {
        let mut expected = EXECUTE_HEADER.to_vec();
        expected.extend_from_slice(&[0x00, 0x01, 0x08, 0x00]);
        expected.extend_from_slice(&[0x52, 0x52, 0x53, 0x54, 0x00, 0x00, 0x54, 0xff]);
        assert_eq!(execute(1, &[Value::Int64(-0xab_ffff_abac_adae)]), expected);
    }

    #[test]
    fn test_execute_null() {
        let mut expected = EXECUTE_HEADER.to_vec();
        expected.extend_from_slice(&[0x01, 0x01, 0x06, 0x00]);
        assert_eq!(execute(1, &[Value::Null]), expected);
    }

    #[test]
    fn test_execute_several_params() {
        let params = [
            Value::UInt64(0xab_ffff_abac_adae),
            Value::Int64(-0xab_ffff_abac_adae),
            Value::from("test"),
            Value::Null,
            Value::Float64(2.1e214),
            Value::Date(Date::new(2010, 9, 3)),
            Value::DateTime(DateTime::new(2010, 9, 3, 10, 30, 59, 231_800)),
            Value::Time(Time::from_parts(false, 230, 30, 59, 231_800)),
            Value::Null,
        ];
        let expected = vec![
            0x17, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x08, 0x01, 0x01, 0x08,
            0x80, 0x08, 0x00, 0x0f, 0x00, 0x06, 0x00, 0x05, 0x00, 0x0a, 0x00, 0x0c, 0x00, 0x0b,
            0x00, 0x06, 0x00, 0xae, 0xad, 0xac, 0xab, 0xff, 0xff, 0xab, 0x00, 0x52, 0x52, 0x53,
            0x54, 0x00, 0x00, 0x54, 0xff, 0x04, 0x74, 0x65, 0x73, 0x74, 0x56, 0xc0, 0xee, 0xa6,
            0x95, 0x30, 0x6f, 0x6c, 0x04, 0xda, 0x07, 0x09, 0x03, 0x0b, 0xda, 0x07, 0x09, 0x03,
            0x0a, 0x1e, 0x3b, 0x78, 0x89, 0x03, 0x00, 0x0c, 0x00, 0x09, 0x00, 0x00, 0x00, 0x0e,
            0x1e, 0x3b, 0x78, 0x89, 0x03, 0x00,
        ];
        assert_eq!(execute(2, &params), expected);
    }
}
