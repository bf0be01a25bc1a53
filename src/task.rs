//! Work items and remotely-submittable tasks.
//!
//! A [`Work`] is a deferred computation bound to the worker that will run
//! it. Closures cannot cross a process boundary, so work sent to another
//! worker is described by a [`RemoteTask`]: a serializable value with a
//! stable name that turns into a `Work` when it arrives. Every worker that
//! may receive a task type must register it on its builder.
//!
//! # Example
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use taskloaf::{RemoteTask, Work};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Square(u64);
//!
//! impl RemoteTask for Square {
//!     const NAME: &'static str = "square";
//!
//!     fn into_work(self) -> Work {
//!         Work::sync(Self::NAME, move |worker| {
//!             tracing::info!(address = worker.address(), result = self.0 * self.0);
//!             Ok(())
//!         })
//!     }
//! }
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::MsgPackCodec;
use crate::error::{Result, TaskloafError};
use crate::worker::Worker;

/// Boxed future for suspendable work; not `Send`, it stays on its worker.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Body of a work item.
pub enum WorkBody {
    /// Runs to completion inside one work step.
    Sync(Box<dyn FnOnce(&Worker) -> Result<()>>),
    /// Spawned as an independently tracked task that may yield.
    Suspendable(Box<dyn FnOnce(Worker) -> LocalBoxFuture<'static, Result<()>>>),
}

/// A deferred computation scheduled on one worker.
pub struct Work {
    label: Cow<'static, str>,
    body: WorkBody,
}

impl Work {
    /// Plain synchronous work item.
    pub fn sync<F>(label: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(&Worker) -> Result<()> + 'static,
    {
        Self {
            label: label.into(),
            body: WorkBody::Sync(Box::new(f)),
        }
    }

    /// Suspend-capable work item.
    ///
    /// The future runs as its own task on the worker's thread. Its failure,
    /// panic or cancellation is logged and never reaches the scheduler.
    pub fn suspendable<F, Fut>(label: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(Worker) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        Self {
            label: label.into(),
            body: WorkBody::Suspendable(Box::new(move |worker| Box::pin(f(worker)))),
        }
    }

    /// Label used in log context.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether this item is spawned rather than run inline.
    pub fn is_suspendable(&self) -> bool {
        matches!(self.body, WorkBody::Suspendable(_))
    }

    pub(crate) fn into_parts(self) -> (Cow<'static, str>, WorkBody) {
        (self.label, self.body)
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work")
            .field("label", &self.label)
            .field("suspendable", &self.is_suspendable())
            .finish()
    }
}

/// A work item that can be shipped to another worker.
pub trait RemoteTask: Serialize + DeserializeOwned + 'static {
    /// Stable name; identical on every worker.
    const NAME: &'static str;

    /// Turn the decoded task into runnable work on the receiving worker.
    fn into_work(self) -> Work;
}

/// Argument of a WORK envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkPayload {
    /// [`RemoteTask::NAME`] of the encoded task.
    pub task: String,
    /// MsgPack encoding of the task value.
    #[serde(with = "serde_bytes")]
    pub args: Vec<u8>,
}

impl WorkPayload {
    /// Encode a task. Distributed references inside it are cloned.
    pub fn encode<T: RemoteTask>(task: &T) -> Result<Self> {
        Ok(Self {
            task: T::NAME.to_string(),
            args: MsgPackCodec::encode(task)?,
        })
    }
}

type TaskDecoder = fn(&Worker, &[u8]) -> Result<Work>;

fn decode_task<T: RemoteTask>(worker: &Worker, args: &[u8]) -> Result<Work> {
    let task: T = MsgPackCodec::decode_in(worker, args)?;
    Ok(task.into_work())
}

/// Task types a worker accepts over the wire, by name.
pub struct TaskRegistry {
    decoders: HashMap<&'static str, TaskDecoder>,
}

impl TaskRegistry {
    /// Registry holding only the built-in [`Shutdown`] task.
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: HashMap::new(),
        };
        registry.register::<Shutdown>();
        registry
    }

    /// Accept task type `T`.
    pub fn register<T: RemoteTask>(&mut self) {
        self.decoders.insert(T::NAME, decode_task::<T>);
    }

    /// Check whether a task name is accepted.
    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    /// Rebuild the work item carried by a WORK envelope.
    pub fn decode(&self, worker: &Worker, payload: &WorkPayload) -> Result<Work> {
        let decoder = self
            .decoders
            .get(payload.task.as_str())
            .ok_or_else(|| TaskloafError::UnknownTask(payload.task.clone()))?;
        decoder(worker, &payload.args)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Stops the receiving worker once its pending work is drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shutdown;

impl RemoteTask for Shutdown {
    const NAME: &'static str = "taskloaf.shutdown";

    fn into_work(self) -> Work {
        Work::sync(Self::NAME, |worker| {
            worker.shutdown();
            Ok(())
        })
    }
}
