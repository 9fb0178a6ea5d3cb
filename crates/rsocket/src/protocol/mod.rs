//! Protocol level error types.
//!
//! - [`ProtocolError`]: the frame codec could not decode or encode a frame
//! - [`StreamError`]: terminal error of one stream, delivered to its subscriber
//! - [`SessionError`]: a session operation (setup, resume, request on a closed session) failed
//! - [`HandlerError`]: what application request handlers return

mod error;
pub use error::HandlerError;
pub use error::ProtocolError;
pub use error::SessionError;
pub use error::StreamError;
