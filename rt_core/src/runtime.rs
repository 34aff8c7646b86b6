//! Acceptor worker dispatch: reuses `common::ThreadPool` as the fan-out
//! mechanism from the listener thread onto the per-worker socket pools.
//! Each worker thread owns exactly one `UpstreamSocketPool` for its whole
//! lifetime, held in thread-local storage — the pool is never sent across
//! threads, only the jobs that borrow it are.

use std::cell::RefCell;

use common::thread_pool::{ThreadPool, ThreadPoolError};
use logger::Logger;

use crate::pool::UpstreamSocketPool;

thread_local! {
    static WORKER_POOL: RefCell<Option<UpstreamSocketPool>> = const { RefCell::new(None) };
}

pub struct AcceptorRuntime {
    pool: ThreadPool,
    logger: Logger,
}

impl AcceptorRuntime {
    pub fn new(workers: usize, logger: Logger) -> Self {
        AcceptorRuntime {
            pool: ThreadPool::new(workers),
            logger,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.cant_workers()
    }

    /// Runs `job` on a worker thread with mutable access to that worker's
    /// own socket pool, created lazily on the thread's first job.
    pub fn dispatch<F>(&self, job: F) -> Result<(), ThreadPoolError>
    where
        F: FnOnce(&mut UpstreamSocketPool) + Send + 'static,
    {
        let logger = self.logger.clone();
        self.pool.execute(move || {
            WORKER_POOL.with(|cell| {
                let mut slot = cell.borrow_mut();
                if slot.is_none() {
                    *slot = Some(UpstreamSocketPool::new(logger.clone()));
                }
                job(slot.as_mut().expect("pool initialized above"));
            });
        })
    }
}
