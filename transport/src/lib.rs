//! Framed JSON-RPC 2.0 transport over a pair of byte streams
//! (`spec.md` §4.1, component C1). In practice this is always a worker
//! subprocess's stdin/stdout, so [`Transport`] owns a `tokio::process::Child`
//! directly rather than being generic over arbitrary streams — the framing
//! codec itself (`framing` module) is stream-generic and unit-tested in
//! isolation from process spawning.

pub mod framing;
pub mod process;

pub use framing::FramingError;
pub use process::{Transport, TransportError};
