// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Status codes and the structured error delivered for every failed call
//!
//! Codes keep the gRPC numbering where one exists so they stay stable on the
//! wire. `ProtocolViolation` reuses the FAILED_PRECONDITION slot.

use std::fmt;

use crate::transport::{Frame, STATUS_CODE_KEY};

/// Outcome codes of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum Code {
    /// Success
    #[default]
    Ok = 0,
    /// The owner of the call cancelled it
    Cancelled = 1,
    /// Any failure that matches no other code
    Unknown = 2,
    /// Handler logic rejected the content of a request
    InvalidArgument = 3,
    /// The deadline elapsed before the call completed
    DeadlineExceeded = 4,
    /// An operation was attempted outside its legal state
    ProtocolViolation = 9,
    /// The transport could not establish the call or severed it
    Unavailable = 14,
}

impl Code {
    /// Returns true if this is a success code
    pub fn is_ok(&self) -> bool {
        matches!(self, Code::Ok)
    }

    /// Returns true if this is an error code
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }

    /// Convert from the wire representation
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Code::Ok),
            1 => Some(Code::Cancelled),
            2 => Some(Code::Unknown),
            3 => Some(Code::InvalidArgument),
            4 => Some(Code::DeadlineExceeded),
            9 => Some(Code::ProtocolViolation),
            14 => Some(Code::Unavailable),
            _ => None,
        }
    }

    /// Convert to the wire representation
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::ProtocolViolation => "PROTOCOL_VIOLATION",
            Code::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> i32 {
        code.as_i32()
    }
}

/// Structured call error: a code callers branch on plus free text for humans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    /// Create a new status
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a cancelled status
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    /// Create an unknown error status
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    /// Create an invalid argument status
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Create a deadline exceeded status
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// Create a protocol violation status
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(Code::ProtocolViolation, message)
    }

    /// Create an unavailable status
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Get the status code
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the status message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Encode this status as a trailing error frame.
    pub fn to_frame(&self) -> Frame {
        let mut frame = Frame::message(self.message.clone().into_bytes());
        frame
            .metadata
            .insert(STATUS_CODE_KEY.to_string(), self.code.as_i32().to_string());
        frame
    }

    /// Classify the status carried by a received frame.
    ///
    /// Returns `None` for regular message frames. A code that cannot be parsed
    /// or that is not part of the taxonomy is reported as `Unknown`.
    pub fn from_frame(frame: &Frame) -> Option<Status> {
        let raw = frame.metadata.get(STATUS_CODE_KEY)?;
        let message = String::from_utf8_lossy(&frame.payload).into_owned();

        match raw.parse::<i32>().ok().map(|v| (v, Code::from_i32(v))) {
            Some((_, Some(Code::Ok))) => None,
            Some((_, Some(code))) => Some(Status::new(code, message)),
            Some((value, None)) => Some(Status::unknown(format!(
                "unrecognised status code {value}: {message}"
            ))),
            None => Some(Status::unknown(format!(
                "malformed status code {raw:?}: {message}"
            ))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Status {{ code: {}, message: \"{}\" }}",
            self.code, self.message
        )
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_wire_values() {
        for code in [
            Code::Ok,
            Code::Cancelled,
            Code::Unknown,
            Code::InvalidArgument,
            Code::DeadlineExceeded,
            Code::ProtocolViolation,
            Code::Unavailable,
        ] {
            assert_eq!(Code::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(Code::ProtocolViolation.as_i32(), 9);
        assert_eq!(Code::from_i32(5), None);
        assert!(Code::Ok.is_ok());
        assert!(Code::Unavailable.is_err());
    }

    #[test]
    fn test_status_display() {
        let status = Status::invalid_argument("names must differ");
        assert_eq!(
            status.to_string(),
            "Status { code: INVALID_ARGUMENT, message: \"names must differ\" }"
        );
    }

    #[test]
    fn test_status_frame() {
        let status = Status::deadline_exceeded("too slow");
        let frame = status.to_frame();
        assert_eq!(Status::from_frame(&frame), Some(status));

        let plain = Frame::message(b"hello".to_vec());
        assert_eq!(Status::from_frame(&plain), None);
    }

    #[test]
    fn test_unrecognised_code_is_unknown() {
        let mut frame = Frame::message(b"boom".to_vec());
        frame
            .metadata
            .insert(STATUS_CODE_KEY.to_string(), "42".to_string());
        let status = Status::from_frame(&frame).unwrap();
        assert_eq!(status.code(), Code::Unknown);

        frame
            .metadata
            .insert(STATUS_CODE_KEY.to_string(), "not-a-code".to_string());
        let status = Status::from_frame(&frame).unwrap();
        assert_eq!(status.code(), Code::Unknown);
        assert!(status.message().contains("boom"));
    }
}
