// Keel - the request-dispatch core of an API client
//
// Authenticated requests with session-token refresh, an ordered interceptor
// chain, and streamed downloads that decompress while reporting progress.

// Re-export the request pipeline
pub use keel_request::*;

// Re-export the body codecs
pub use keel_compression;

// Prelude for common imports
pub mod prelude {
    pub use keel_request::prelude::*;
    pub use keel_request::{ProgressMeter, TokenGate};
}
