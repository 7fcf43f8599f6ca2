use super::EncodingError;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Serialize a value using bincode
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| EncodingError::InvalidFormat(format!("Serialization failed: {}", e)).into())
}

/// Deserialize a value from a byte slice using bincode
pub fn deserialize<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| match *e {
        bincode::ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            EncodingError::TruncatedData.into()
        }
        _ => EncodingError::InvalidFormat(format!("Deserialization failed: {}", e)).into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_serialize_deserialize_paths() {
        let paths = vec!["CPUs/0/Status".to_string(), "Threads/1/Exec".to_string()];
        let bytes = serialize(&paths).unwrap();
        let decoded: Vec<String> = deserialize(&bytes).unwrap();
        assert_eq!(paths, decoded);
    }

    #[test]
    fn test_truncated_data() {
        let bytes = serialize(&vec!["abcdef".to_string()]).unwrap();
        let result: Result<Vec<String>> = deserialize(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(Error::Corruption(msg)) if msg.contains("Truncated")));
    }

    #[test]
    fn test_invalid_data() {
        // A length prefix far beyond the buffer followed by invalid UTF-8.
        let invalid_data = vec![0x01, 0, 0, 0, 0, 0, 0, 0, 0xFF];
        let result: Result<String> = deserialize(&invalid_data);
        assert!(result.is_err());
    }
}
