//! Client-side connection pool: N persistent transport connections, lent one
//! per in-flight request, with blocking acquire and FIFO-ish reuse.
//!
//! Ownership mirrors the mutex+condvar queue from the original design, but
//! expressed with a lock-free idle queue ([`crossbeam_queue::ArrayQueue`])
//! plus [`tokio::sync::Notify`] for blocked acquirers, since this is async
//! Rust rather than a thread pool.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::ArrayQueue;
use thiserror::Error;
use tokio::sync::Notify;

use crate::transport::{BoxedStream, Endpoint};

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection pool is shut down")]
    Closed,
    #[error("i/o error establishing pool connection: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns the fixed set of data connections for one mount.
pub struct Pool {
    idle: ArrayQueue<BoxedStream>,
    notify: Notify,
    closed: AtomicBool,
    size: usize,
}

impl Pool {
    /// Dials `size` connections to `endpoint` and enqueues them all idle.
    pub async fn connect(endpoint: &Endpoint, size: usize) -> Result<Pool, Error> {
        let idle = ArrayQueue::new(size);
        for _ in 0..size {
            let stream = endpoint.connect().await?;
            idle.push(stream).map_err(|_| ()).expect("queue sized to pool capacity");
        }
        Ok(Pool { idle, notify: Notify::new(), closed: AtomicBool::new(false), size })
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Blocks until a connection is available, returning a lease that must be
    /// resolved with [`Lease::release`] or [`Lease::poison`].
    pub async fn acquire(&self) -> Result<Lease<'_>, Error> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::Closed);
            }
            if let Some(conn) = self.idle.pop() {
                return Ok(Lease { pool: self, conn: Some(conn) });
            }
            self.notify.notified().await;
        }
    }

    /// Wakes every blocked `acquire()` so mount teardown is observed instead
    /// of hanging forever waiting for a connection that will never return.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn release(&self, conn: BoxedStream) {
        // The pool was sized to exactly `size` connections handed out one at
        // a time, so this can never find the queue full.
        let _ = self.idle.push(conn);
        self.notify.notify_one();
    }
}

/// A connection on loan from the pool for the duration of one request/response
/// round-trip. Must be explicitly released or poisoned; dropping it without
/// doing either leaks the connection out of the pool (the lease is consumed
/// by both exit methods to make this hard to do by accident).
pub struct Lease<'p> {
    pool: &'p Pool,
    conn: Option<BoxedStream>,
}

impl<'p> Lease<'p> {
    pub fn stream(&mut self) -> &mut BoxedStream {
        self.conn.as_mut().expect("lease used after release")
    }

    /// Returns the connection to the pool's idle queue. Used after a
    /// complete round-trip, including one that carried an error status --
    /// only a broken transport poisons the connection.
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }

    /// Drops the connection instead of returning it and shuts the whole pool
    /// down: per spec, a transport failure on any pool connection ends the
    /// mount rather than continuing with fewer than the configured connections.
    pub fn poison(mut self) {
        self.conn.take();
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn boxed_pair() -> (BoxedStream, BoxedStream) {
        let (a, b) = duplex(64);
        (Box::new(a), Box::new(b))
    }

    #[tokio::test]
    async fn acquire_blocks_until_release() {
        let idle = ArrayQueue::new(1);
        let (a, _b) = boxed_pair();
        idle.push(a).ok();
        let pool = Pool { idle, notify: Notify::new(), closed: AtomicBool::new(false), size: 1 };

        let lease = pool.acquire().await.unwrap();

        let pool_ref = &pool;
        let waiter = async {
            pool_ref.acquire().await.unwrap();
        };
        tokio::pin!(waiter);

        // The second acquire must not complete before release.
        tokio::select! {
            _ = &mut waiter => panic!("acquire resolved before a connection was released"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }

        lease.release();
        waiter.await;
    }

    #[tokio::test]
    async fn poison_wakes_blocked_acquirers_with_closed_error() {
        let idle = ArrayQueue::new(1);
        let (a, _b) = boxed_pair();
        idle.push(a).ok();
        let pool = Pool { idle, notify: Notify::new(), closed: AtomicBool::new(false), size: 1 };

        let lease = pool.acquire().await.unwrap();

        let pool_ref = &pool;
        let waiter = async { pool_ref.acquire().await };
        tokio::pin!(waiter);

        lease.poison();

        match (&mut waiter).await {
            Err(Error::Closed) => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }
}
