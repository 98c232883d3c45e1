//! Client abstraction for the generation backend.
//!
//! The gateway never generates text itself. It forwards each exchange to a
//! backend through [`ChatProvider`], either as one whole reply or as a stream
//! of chunks, and can ask the backend to stop an in-flight generation.
//!
//! Every request carries a short-lived HS256 credential naming the user,
//! signed by [`UpstreamSigner`] with a secret shared with the backend.

pub mod credentials;
pub mod error;
pub mod http;
pub mod provider;
pub mod types;

pub use credentials::{CREDENTIAL_TTL, UpstreamClaims, UpstreamSigner};
pub use error::{Result, UpstreamError};
pub use http::{HttpProvider, HttpProviderConfig};
pub use provider::{CancelRequest, ChatProvider, ChunkStream, SharedProvider};
#[cfg(any(test, feature = "testing"))]
pub use provider::{MockProvider, MockStep};
pub use types::{CancelOutcome, ChatMode, ChatReply, ChatRequest, ServerInfo, StreamChunk};
