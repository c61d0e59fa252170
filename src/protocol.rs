//! Request classification and response generation.
//!
//! Each payload read from a connection is classified as one of:
//! - `ping...`: liveness check, answered with `pong`
//! - `paths...`: the configured list of watched paths as a JSON array
//! - a JSON array of strings: parity status per string as a JSON object
//!
//! Anything else is a decode failure and is answered with `{}`.
//!
//! ```text
//! Request:  ping
//! Response: pong
//!
//! Request:  ["ab","abc"]
//! Response: {"ab":0,"abc":1}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, trace, warn};

/// Prefix of a liveness check
const PING_PREFIX: &[u8] = b"ping";

/// Prefix of a path enumeration request
const PATHS_PREFIX: &[u8] = b"paths";

/// Reply to a liveness check
pub const PONG: &str = "pong";

/// Fallback reply for decode and encode failures, and for an empty result
pub const EMPTY_OBJECT: &str = "{}";

/// Fallback reply when the path list cannot be encoded
pub const EMPTY_ARRAY: &str = "[]";

/// Classified request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Liveness check
    Ping,
    /// Enumerate the configured paths
    Paths,
    /// Report odd/even length for each string
    Parity(Vec<String>),
}

/// Payload is not a JSON array of strings
#[derive(Debug)]
pub struct DecodeError(serde_json::Error);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid string array: {}", self.0)
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl Request {
    /// Classify a raw payload. Prefixes are matched byte-for-byte, so
    /// payloads that are not valid UTF-8 still classify.
    pub fn parse(payload: &[u8]) -> Result<Request, DecodeError> {
        if payload.starts_with(PING_PREFIX) {
            Ok(Request::Ping)
        } else if payload.starts_with(PATHS_PREFIX) {
            Ok(Request::Paths)
        } else {
            serde_json::from_slice::<Vec<String>>(payload)
                .map(Request::Parity)
                .map_err(DecodeError)
        }
    }
}

/// Stateless payload dispatcher.
///
/// The path list is fixed at construction and never derived from a payload.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    paths: Vec<String>,
}

impl Dispatcher {
    pub fn new(paths: Vec<String>) -> Self {
        Dispatcher { paths }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Map one payload to one response line (without the terminator).
    pub fn dispatch(&self, payload: &[u8]) -> String {
        trace!(payload = %String::from_utf8_lossy(payload), "Processing message");

        match Request::parse(payload) {
            Ok(request) => self.handle(&request),
            Err(e) => {
                warn!(error = %e, "Decode error");
                EMPTY_OBJECT.to_string()
            }
        }
    }

    /// Produce the response for an already classified request.
    pub fn handle(&self, request: &Request) -> String {
        match request {
            Request::Ping => PONG.to_string(),
            Request::Paths => match serde_json::to_string(&self.paths) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to encode path list");
                    EMPTY_ARRAY.to_string()
                }
            },
            Request::Parity(items) => match serde_json::to_string(&parity_map(items)) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to encode parity map");
                    EMPTY_OBJECT.to_string()
                }
            },
        }
    }
}

/// Map each string to 1 if its byte length is odd, 0 otherwise.
/// Later duplicates overwrite earlier ones; keys come out sorted.
pub fn parity_map(items: &[String]) -> BTreeMap<&str, u8> {
    let mut map = BTreeMap::new();
    for item in items {
        map.insert(item.as_str(), (item.len() % 2) as u8);
    }
    map
}
