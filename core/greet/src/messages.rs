// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Request and response records of the greet service
//!
//! Every method has its own request and response type; they all carry the
//! same shapes. Payloads are bincode-encoded with the standard configuration.

use bincode::{Decode, Encode};
use greet_rpc::{Decoder, Encoder, Status};

#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Greeting {
    pub first_name: String,
    pub last_name: String,
}

impl Greeting {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

macro_rules! bincode_codec {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl Encoder for $ty {
                fn encode(&self) -> Result<Vec<u8>, Status> {
                    bincode::encode_to_vec(self, bincode::config::standard())
                        .map_err(|e| Status::unknown(format!("Encoding error: {}", e)))
                }
            }

            impl Decoder for $ty {
                fn decode(buf: &[u8]) -> Result<Self, Status> {
                    let (decoded, _len): ($ty, usize) =
                        bincode::decode_from_slice(buf, bincode::config::standard())
                            .map_err(|e| Status::unknown(format!("Decoding error: {}", e)))?;
                    Ok(decoded)
                }
            }
        )+
    };
}

macro_rules! request {
    ($($(#[$doc:meta])* $ty:ident),+ $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
            pub struct $ty {
                pub greeting: Greeting,
            }

            impl $ty {
                pub fn new(greeting: Greeting) -> Self {
                    Self { greeting }
                }
            }
        )+
    };
}

macro_rules! response {
    ($($(#[$doc:meta])* $ty:ident),+ $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
            pub struct $ty {
                pub result: String,
            }
        )+
    };
}

request!(
    GreetRequest,
    GreetManyTimesRequest,
    /// One element of the request stream
    LongGreetRequest,
    /// One element of the request stream
    GreetEveryoneRequest,
    GreetWithDeadlineRequest,
    GreetWithErrorHandlingRequest,
);

response!(
    GreetResponse,
    /// One element of the response stream
    GreetManyTimesResponse,
    /// Aggregate over the whole request stream
    LongGreetResponse,
    /// One element of the response stream
    GreetEveryoneResponse,
    GreetWithDeadlineResponse,
    GreetWithErrorHandlingResponse,
);

bincode_codec!(
    GreetRequest,
    GreetResponse,
    GreetManyTimesRequest,
    GreetManyTimesResponse,
    LongGreetRequest,
    LongGreetResponse,
    GreetEveryoneRequest,
    GreetEveryoneResponse,
    GreetWithDeadlineRequest,
    GreetWithDeadlineResponse,
    GreetWithErrorHandlingRequest,
    GreetWithErrorHandlingResponse,
);

#[cfg(test)]
mod tests {
    use super::*;
    use greet_rpc::Code;

    #[test]
    fn test_request_encoding() {
        let request = GreetRequest::new(Greeting::new("John", "Doe"));
        let bytes = Encoder::encode(&request).unwrap();
        assert_eq!(<GreetRequest as Decoder>::decode(&bytes).unwrap(), request);
    }

    #[test]
    fn test_decode_garbage_is_unknown() {
        let err = <GreetResponse as Decoder>::decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(err.code(), Code::Unknown);
    }
}
