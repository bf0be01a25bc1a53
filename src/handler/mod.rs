//! Handler module - message-kind registry and dispatch.
//!
//! Provides:
//! - [`Protocol`] - maps type codes to names and handlers
//! - [`Handler`] / [`TypedHandler`] - handlers over decoded arguments
//!
//! # Example
//!
//! ```ignore
//! use taskloaf::handler::Protocol;
//!
//! let mut protocol = Protocol::new();
//!
//! let simple = protocol.add_handler("simple", |_worker, (a, b): (u32, u32)| {
//!     tracing::info!(a, b, "simple");
//!     Ok(())
//! })?;
//!
//! let frame = protocol.encode(simple, &(123u32, 456u32))?;
//! ```

mod registry;

pub use registry::{Handler, HandlerResult, Protocol, TypedHandler};
