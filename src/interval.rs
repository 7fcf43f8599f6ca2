//! A value together with the time range over which it held.
//!
//! ## Record layout
//!
//! Each interval occupies a fixed 25-byte record in the data section of a
//! node, plus an optional payload in the node's string section:
//!
//! ```text
//! +------------+----------+-----------------+----------+--------------------+
//! | start: i64 | end: i64 | attribute: u32  | type: u8 | int or offset: i32 |
//! +------------+----------+-----------------+----------+--------------------+
//! ```
//!
//! String payloads are `[len: u8][bytes][0x00]` and are referenced by their
//! offset from the start of the block.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::time::Timestamp;
use crate::value::{StateValue, MAX_STRING_LEN, TYPE_INTEGER, TYPE_NULL, TYPE_STRING};
use crate::{AttributeId, Error};

/// Size of the fixed part of an interval record.
pub const INTERVAL_RECORD_SIZE: usize = 8 + 8 + 4 + 1 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    start: Timestamp,
    end: Timestamp,
    attribute: AttributeId,
    value: StateValue,
}

impl Interval {
    pub fn new(
        start: Timestamp,
        end: Timestamp,
        attribute: AttributeId,
        value: StateValue,
    ) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidInterval(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        if let StateValue::String(s) = &value {
            if s.len() > MAX_STRING_LEN {
                return Err(Error::InvalidInterval(format!(
                    "string value of {} bytes exceeds the {} byte limit",
                    s.len(),
                    MAX_STRING_LEN
                )));
            }
        }
        Ok(Self {
            start,
            end,
            attribute,
            value,
        })
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn attribute(&self) -> AttributeId {
        self.attribute
    }

    pub fn value(&self) -> &StateValue {
        &self.value
    }

    /// Whether the value held at `t`. Intervals are half-open: `[start, end)`.
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }

    /// Total bytes this interval consumes in a node.
    pub fn size(&self) -> usize {
        INTERVAL_RECORD_SIZE + self.value.variable_size()
    }

    /// Writes the fixed record. `string_offset` is where the payload was
    /// placed in the block and is ignored for non-string values.
    pub(crate) fn encode_record<W: Write>(&self, writer: &mut W, string_offset: u32) -> Result<()> {
        writer
            .write_i64::<BigEndian>(self.start.as_nanos())
            .map_err(|e| Error::Encode("interval start", e))?;
        writer
            .write_i64::<BigEndian>(self.end.as_nanos())
            .map_err(|e| Error::Encode("interval end", e))?;
        writer
            .write_u32::<BigEndian>(self.attribute)
            .map_err(|e| Error::Encode("interval attribute", e))?;
        writer
            .write_u8(self.value.type_tag())
            .map_err(|e| Error::Encode("interval type", e))?;

        let field = match &self.value {
            StateValue::Integer(v) => *v,
            StateValue::String(_) => string_offset as i32,
            StateValue::Null => 0,
        };
        writer
            .write_i32::<BigEndian>(field)
            .map_err(|e| Error::Encode("interval value", e))?;
        Ok(())
    }

    /// Writes the string payload, if any, into `block` at `offset`.
    pub(crate) fn encode_payload(&self, block: &mut [u8], offset: usize) {
        if let StateValue::String(s) = &self.value {
            let bytes = s.as_bytes();
            block[offset] = bytes.len() as u8;
            block[offset + 1..offset + 1 + bytes.len()].copy_from_slice(bytes);
            block[offset + 1 + bytes.len()] = 0;
        }
    }

    /// Reads one fixed record from `reader`, resolving string payloads
    /// against the whole `block`.
    pub(crate) fn decode_record<R: Read>(reader: &mut R, block: &[u8]) -> Result<Self> {
        let start = reader
            .read_i64::<BigEndian>()
            .map_err(|e| Error::Decode("interval start", e))?;
        let end = reader
            .read_i64::<BigEndian>()
            .map_err(|e| Error::Decode("interval end", e))?;
        let attribute = reader
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("interval attribute", e))?;
        let type_tag = reader
            .read_u8()
            .map_err(|e| Error::Decode("interval type", e))?;
        let field = reader
            .read_i32::<BigEndian>()
            .map_err(|e| Error::Decode("interval value", e))?;

        let value = match type_tag {
            TYPE_INTEGER => StateValue::Integer(field),
            TYPE_NULL => StateValue::Null,
            TYPE_STRING => StateValue::String(decode_payload(block, field as u32 as usize)?),
            other => {
                return Err(Error::Corruption(format!(
                    "unknown value type tag {:#04x}",
                    other
                )))
            }
        };

        if start > end {
            return Err(Error::Corruption(format!(
                "stored interval [{}, {}) is inverted",
                start, end
            )));
        }

        Ok(Self {
            start: Timestamp::new(start),
            end: Timestamp::new(end),
            attribute,
            value,
        })
    }
}

fn decode_payload(block: &[u8], offset: usize) -> Result<String> {
    let len = *block
        .get(offset)
        .ok_or_else(|| Error::Corruption(format!("string offset {} out of block", offset)))?
        as usize;
    let bytes = block
        .get(offset + 1..offset + 1 + len)
        .ok_or_else(|| Error::Corruption(format!("string at {} overruns block", offset)))?;
    if block.get(offset + 1 + len) != Some(&0) {
        return Err(Error::Corruption(format!(
            "string at {} is not terminated",
            offset
        )));
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::Corruption(format!("string at {} is not valid UTF-8", offset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ts(n: i64) -> Timestamp {
        Timestamp::new(n)
    }

    #[test]
    fn test_half_open_contains() {
        let interval = Interval::new(ts(10), ts(20), 0, StateValue::Integer(2)).unwrap();
        assert!(!interval.contains(ts(9)));
        assert!(interval.contains(ts(10)));
        assert!(interval.contains(ts(19)));
        assert!(!interval.contains(ts(20)));
    }

    #[test]
    fn test_rejects_inverted_range() {
        let result = Interval::new(ts(5), ts(4), 0, StateValue::Null);
        assert!(matches!(result, Err(Error::InvalidInterval(_))));
    }

    #[test]
    fn test_rejects_long_strings() {
        let long = "x".repeat(MAX_STRING_LEN + 1);
        let result = Interval::new(ts(0), ts(1), 0, StateValue::String(long));
        assert!(matches!(result, Err(Error::InvalidInterval(_))));
    }

    #[test]
    fn test_sizes() {
        let int = Interval::new(ts(0), ts(1), 3, StateValue::Integer(7)).unwrap();
        assert_eq!(int.size(), 25);

        let string = Interval::new(ts(0), ts(1), 3, StateValue::from("sched")).unwrap();
        assert_eq!(string.size(), 25 + 5 + 2);
    }

    #[test]
    fn test_record_with_payload() {
        let interval = Interval::new(ts(-4), ts(90), 12, StateValue::from("swapper")).unwrap();

        let mut block = vec![0u8; 128];
        let offset = block.len() - interval.value().variable_size();
        interval.encode_payload(&mut block, offset);

        let mut record = Vec::new();
        interval.encode_record(&mut record, offset as u32).unwrap();
        assert_eq!(record.len(), INTERVAL_RECORD_SIZE);
        block[..record.len()].copy_from_slice(&record);

        let decoded = Interval::decode_record(&mut Cursor::new(&block[..]), &block).unwrap();
        assert_eq!(decoded, interval);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let interval = Interval::new(ts(0), ts(1), 0, StateValue::Integer(1)).unwrap();
        let mut record = Vec::new();
        interval.encode_record(&mut record, 0).unwrap();
        record[20] = 0x42;

        let result = Interval::decode_record(&mut Cursor::new(&record[..]), &record);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }
}
