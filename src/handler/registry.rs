//! Protocol registry mapping type codes to handlers.
//!
//! Codes are assigned sequentially: the built-in [`MessageKind`]s take the
//! lowest codes (WORK is always 0), user handlers follow from
//! [`FIRST_USER_TYPE_CODE`] in registration order. A [`Protocol`] is built
//! mutable and then moved into a worker, which only ever reads it, so
//! registration is closed once the scheduler can run.
//!
//! # Example
//!
//! ```ignore
//! use taskloaf::handler::Protocol;
//!
//! let mut protocol = Protocol::new();
//! let ping = protocol.add_handler("ping", |_worker, n: u32| {
//!     tracing::info!(n, "ping");
//!     Ok(())
//! })?;
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::dref::Decrement;
use crate::error::{Result, TaskloafError};
use crate::protocol::{Envelope, MessageKind, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::task::WorkPayload;
use crate::worker::Worker;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Trait for handler functions.
pub trait Handler: 'static {
    /// Handle an envelope's raw argument bytes on `worker`.
    fn call(&self, worker: &Worker, payload: &[u8]) -> HandlerResult;
}

/// Wrapper that decodes arguments in the worker's context before calling
/// the handler.
pub struct TypedHandler<F, T>
where
    F: Fn(&Worker, T) -> HandlerResult + 'static,
    T: DeserializeOwned + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TypedHandler<F, T>
where
    F: Fn(&Worker, T) -> HandlerResult + 'static,
    T: DeserializeOwned + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> Handler for TypedHandler<F, T>
where
    F: Fn(&Worker, T) -> HandlerResult + 'static,
    T: DeserializeOwned + 'static,
{
    fn call(&self, worker: &Worker, payload: &[u8]) -> HandlerResult {
        let args: T = MsgPackCodec::decode_in(worker, payload)?;
        (self.handler)(worker, args)
    }
}

/// Entry for a registered message kind.
struct HandlerEntry {
    /// Registered name.
    name: String,
    /// The handler function.
    handler: Box<dyn Handler>,
}

/// Registry mapping message kinds to type codes and handlers.
pub struct Protocol {
    /// Entries indexed by type code.
    entries: Vec<HandlerEntry>,
    /// Name to type code mapping.
    codes: HashMap<String, u16>,
    /// Ceiling for incoming envelope payloads.
    max_payload_size: u32,
}

impl Protocol {
    /// Create a protocol with only the built-in message kinds registered.
    pub fn new() -> Self {
        let mut protocol = Self {
            entries: Vec::new(),
            codes: HashMap::new(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        };

        for kind in MessageKind::ALL {
            let handler: Box<dyn Handler> = match kind {
                MessageKind::Work => Box::new(TypedHandler::new(
                    |worker: &Worker, payload: WorkPayload| worker.accept_work(payload),
                )),
                MessageKind::Decrement => Box::new(TypedHandler::new(
                    |worker: &Worker, decrement: Decrement| {
                        worker.apply_decrement(decrement);
                        Ok(())
                    },
                )),
            };
            protocol.push_entry(kind.name(), handler);
        }

        protocol
    }

    /// Set the maximum accepted payload size for [`decode`](Self::decode).
    pub fn set_max_payload_size(&mut self, max_payload_size: u32) {
        self.max_payload_size = max_payload_size;
    }

    /// Maximum accepted payload size.
    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    /// Register a handler under `name` and return its type code.
    ///
    /// Registering a name twice replaces the handler and keeps the code.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when `name` belongs to a built-in kind or the
    /// type-code space is exhausted.
    pub fn add_handler<F, T>(&mut self, name: &str, handler: F) -> Result<u16>
    where
        F: Fn(&Worker, T) -> HandlerResult + 'static,
        T: DeserializeOwned + 'static,
    {
        if MessageKind::ALL.iter().any(|kind| kind.name() == name) {
            return Err(TaskloafError::Protocol(format!(
                "\"{}\" is a built-in message kind",
                name
            )));
        }

        let typed = Box::new(TypedHandler::new(handler));
        if let Some(&code) = self.codes.get(name) {
            tracing::warn!(name, type_code = code, "replacing registered handler");
            self.entries[code as usize].handler = typed;
            return Ok(code);
        }

        if self.entries.len() > u16::MAX as usize {
            return Err(TaskloafError::Protocol(
                "type code space exhausted".to_string(),
            ));
        }
        Ok(self.push_entry(name, typed))
    }

    fn push_entry(&mut self, name: &str, handler: Box<dyn Handler>) -> u16 {
        let code = self.entries.len() as u16;
        self.entries.push(HandlerEntry {
            name: name.to_string(),
            handler,
        });
        self.codes.insert(name.to_string(), code);
        code
    }

    /// Get type code by name.
    pub fn type_code(&self, name: &str) -> Option<u16> {
        self.codes.get(name).copied()
    }

    /// Get registered name by type code.
    pub fn name(&self, type_code: u16) -> Option<&str> {
        self.entries
            .get(type_code as usize)
            .map(|e| e.name.as_str())
    }

    /// Number of registered message kinds, built-ins included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: built-in kinds are registered at construction.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode `args` into a complete envelope for `type_code`.
    ///
    /// Fails with [`TaskloafError::Protocol`] when the encoded arguments
    /// exceed [`max_payload_size`](Self::max_payload_size), so an envelope
    /// the peer would reject is never sent.
    pub fn encode<T: Serialize + ?Sized>(&self, type_code: u16, args: &T) -> Result<Bytes> {
        let payload = MsgPackCodec::encode(args)?;
        let envelope = Envelope::new(type_code, Bytes::from(payload))?;
        envelope.header.validate(self.max_payload_size)?;
        Ok(envelope.encode())
    }

    /// Decode a frame into its type code and arguments, in `worker`'s context.
    pub fn decode<T: DeserializeOwned>(&self, worker: &Worker, frame: Bytes) -> Result<(u16, T)> {
        let envelope = Envelope::decode(frame, self.max_payload_size)?;
        let args = MsgPackCodec::decode_in(worker, envelope.payload())?;
        Ok((envelope.type_code(), args))
    }

    /// Dispatch an envelope to its registered handler.
    pub fn dispatch(&self, worker: &Worker, envelope: &Envelope) -> Result<()> {
        let entry = self
            .entries
            .get(envelope.type_code() as usize)
            .ok_or(TaskloafError::HandlerNotFound(envelope.type_code()))?;

        tracing::trace!(
            address = worker.address(),
            type_code = envelope.type_code(),
            kind = %entry.name,
            bytes = envelope.payload_len(),
            "dispatching envelope"
        );
        entry.handler.call(worker, envelope.payload())
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new()
    }
}
