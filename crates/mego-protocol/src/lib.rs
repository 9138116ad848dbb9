//! Request/response envelopes and wire codecs for mego.
//!
//! # Envelopes
//!
//! A client calls a method with a [`Request`]:
//!
//! ```text
//! { "method": "Sum", "id": 7, "params": [3, 4] }
//! ```
//!
//! and the server answers with one or more [`Response`]s echoing the id:
//!
//! ```text
//! { "id": 7, "status": 0, "result": 7 }
//! ```
//!
//! Event deliveries carry `event` instead of `id`.
//!
//! # Example
//!
//! ```rust
//! use mego_protocol::{Codec, Request};
//!
//! let request = Request::new("Sum", 7).with_params([3.into(), 4.into()]);
//! let frame = Codec::Json.encode(&request).unwrap();
//! let decoded: Request = Codec::Json.decode(&frame).unwrap();
//! assert_eq!(decoded, request);
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, check_size};
pub use error::{ProtocolError, ProtocolResult};
pub use types::{Chunk, Request, RequestId, Response};

/// Reserved method that merges a key/value map into the session.
pub const INITIALIZE_METHOD: &str = "MegoInitialize";

/// Reserved method that subscribes the session to `[event, channel]`.
pub const SUBSCRIBE_METHOD: &str = "MegoSubscribe";

/// Reserved method that unsubscribes the session from `[event, channel]`.
pub const UNSUBSCRIBE_METHOD: &str = "MegoUnsubscribe";

/// Returns true for method names handled by the engine itself.
pub fn is_reserved(method: &str) -> bool {
    matches!(
        method,
        INITIALIZE_METHOD | SUBSCRIBE_METHOD | UNSUBSCRIBE_METHOD
    )
}
