//! Two workers on two threads, sharing an in-process cluster.
//!
//! Worker 0 stores some bytes behind a distributed reference and sends a
//! clone to worker 1, which inspects it and lets it go. Once worker 0 drops
//! its own instance, the object is reclaimed at its creator.
//!
//! ```text
//! RUST_LOG=taskloaf=debug,two_workers=info cargo run --example two_workers
//! ```

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use taskloaf::dref::DistributedRef;
use taskloaf::transport::local_cluster;
use taskloaf::{RemoteTask, Shutdown, TaskloafError, Work, Worker};

/// Runs on the receiving worker and reports what it was handed.
#[derive(Serialize, Deserialize)]
struct Inspect {
    value: DistributedRef,
}

impl RemoteTask for Inspect {
    const NAME: &'static str = "demo.inspect";

    fn into_work(self) -> Work {
        Work::sync(Self::NAME, move |worker| {
            info!(
                address = worker.address(),
                creator = self.value.creator(),
                id = self.value.id(),
                generation = self.value.generation(),
                local = self.value.is_local(),
                "received reference"
            );
            Ok(())
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("two_workers=info".parse()?),
        )
        .init();

    let mut cluster = local_cluster(2);
    let second = cluster.pop().ok_or("cluster too small")?;
    let first = cluster.pop().ok_or("cluster too small")?;

    // Serves until worker 0 sends it a Shutdown.
    let receiver = thread::spawn(move || -> Result<(), TaskloafError> {
        let worker = Worker::builder(second).task::<Inspect>().build();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(worker.start(|_| async { Ok(()) }))
    });

    let worker = Worker::builder(first).build();
    worker.run(|w| async move {
        let value = DistributedRef::alloc(&w, b"hello from worker 0");
        let id = value.id();
        w.submit_work(1, Inspect { value: value.clone() })?;

        info!(bytes = value.read_local()?.len(), "bytes readable on the owner");
        value.release();

        while w.is_alive(id) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        info!(id, reclaimed = w.reclaimed_objects(), "object reclaimed");

        w.submit_work(1, Shutdown)?;
        Ok::<_, TaskloafError>(())
    })?;

    receiver.join().map_err(|_| "receiver thread panicked")??;
    Ok(())
}
