use std::fmt::{Debug, Formatter};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tracing::{info, trace, warn};

use pf_core::error::{ExecutionError, PfResult};

use crate::engine::Engine;
use crate::primitive::{BoundArgs, Primitive};

/// An in-order execution queue on a single engine.
///
/// [Primitive::execute] validates its arguments and enqueues the work, [Stream::wait] runs everything
/// that was enqueued, in submission order, on the calling thread.
pub struct Stream {
    engine: Engine,
    queue: Mutex<Vec<Job>>,
}

struct Job {
    primitive: Primitive,
    args: BoundArgs,
}

impl Stream {
    pub fn new(engine: &Engine) -> Stream {
        Stream {
            engine: engine.clone(),
            queue: Mutex::new(vec![]),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The number of submitted primitives that have not run yet.
    pub fn pending(&self) -> PfResult<usize> {
        Ok(self.queue()?.len())
    }

    pub(crate) fn submit(&self, primitive: Primitive, args: BoundArgs) -> PfResult<()> {
        trace!(
            "submitting {} to stream on {} with runtime size {:?}",
            primitive.desc().name(),
            self.engine,
            args.runtime_size()
        );
        self.queue()?.push(Job { primitive, args });
        Ok(())
    }

    /// Run all pending work and block until it is done.
    ///
    /// If a primitive fails the remaining work is discarded and the error is returned.
    pub fn wait(&self) -> PfResult<()> {
        let jobs = std::mem::take(&mut *self.queue()?);

        for Job { primitive, args } in jobs {
            let desc = primitive.desc();
            let start = Instant::now();
            desc.run(&args)?;
            let delta = (Instant::now() - start).as_secs_f64();

            info!(
                target: "pf_engine::verbose",
                "exec,{},{},{},{},{:.4}",
                self.engine,
                desc.name(),
                args.describe(),
                desc.problem(),
                delta * 1e3
            );
        }

        Ok(())
    }

    fn queue(&self) -> PfResult<MutexGuard<Vec<Job>>> {
        self.queue
            .lock()
            .map_err(|_| ExecutionError::Poisoned(format!("stream on {}", self.engine)).into())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let pending = match self.queue.get_mut() {
            Ok(queue) => queue.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        if pending > 0 {
            warn!("dropping stream on {} with {} unfinished primitives", self.engine, pending);
        }
    }
}

impl Debug for Stream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let pending = self.queue.lock().map(|q| q.len()).ok();
        f.debug_struct("Stream")
            .field("engine", &self.engine)
            .field("pending", &pending)
            .finish()
    }
}
