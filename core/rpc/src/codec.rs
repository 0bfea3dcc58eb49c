// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Codec traits for message serialization and deserialization
//!
//! The engine only moves byte payloads; typed messages cross the call
//! boundary through these traits.

use crate::Status;

/// Trait for encoding messages to bytes
pub trait Encoder {
    /// Encode a message to bytes
    fn encode(&self) -> Result<Vec<u8>, Status>;
}

/// Trait for decoding messages from bytes
pub trait Decoder: Default {
    /// Decode a message from bytes
    fn decode(buf: &[u8]) -> Result<Self, Status>;
}

/// Combined codec trait for types that can be both encoded and decoded
pub trait Codec: Encoder + Decoder {}

// Blanket implementation
impl<T: Encoder + Decoder> Codec for T {}

impl Encoder for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>, Status> {
        Ok(self.clone())
    }
}

impl Decoder for Vec<u8> {
    fn decode(buf: &[u8]) -> Result<Self, Status> {
        Ok(buf.to_vec())
    }
}

impl Encoder for String {
    fn encode(&self) -> Result<Vec<u8>, Status> {
        Ok(self.as_bytes().to_vec())
    }
}

impl Decoder for String {
    fn decode(buf: &[u8]) -> Result<Self, Status> {
        String::from_utf8(buf.to_vec())
            .map_err(|e| Status::unknown(format!("Decoding error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Code;

    #[test]
    fn test_bytes_passthrough() {
        let msg = vec![1u8, 2, 3, 4];
        let encoded = msg.encode().unwrap();
        assert_eq!(Vec::<u8>::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let err = String::decode(&[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.code(), Code::Unknown);
        assert_eq!(String::decode(b"Hello").unwrap(), "Hello");
    }
}
