//! Bounded pools of reusable connections

pub mod http;

pub use http::{HttpConnection, HttpConnector, Lease};

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::DockerError;

/// Opens, checks and closes the connections a [`Pool`] hands out
#[async_trait]
pub trait Manage: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new connection to `key`
    async fn open(&self, key: &str) -> Result<Self::Connection, DockerError>;

    async fn close(&self, connection: Self::Connection) -> Result<(), DockerError>;

    /// Whether an idle connection can take another request
    async fn is_alive(&self, connection: &mut Self::Connection) -> bool;

    /// Abort every connection this manager opened, including those in use
    fn abort_all(&self) {}
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Live connections allowed at once, idle or in use
    pub max_size: usize,
    /// Wait for a free slot instead of failing immediately
    pub block: bool,
    /// Upper bound on the wait when `block` is set
    pub timeout: Duration,
}

/// Point in time view of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
}

struct Idle<C> {
    key: String,
    connection: C,
    permit: OwnedSemaphorePermit,
}

struct Shared<M: Manage> {
    manager: M,
    config: PoolConfig,
    /// One permit per live connection
    slots: Arc<Semaphore>,
    /// Least recently released at the front
    idle: Mutex<VecDeque<Idle<M::Connection>>>,
    released: Notify,
    closed: AtomicBool,
}

impl<M: Manage> Shared<M> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Idle<M::Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Most recently released idle connection for `key`
    fn take_idle(&self, key: &str) -> Option<Idle<M::Connection>> {
        let mut idle = self.idle();
        let pos = idle.iter().rposition(|entry| entry.key == key)?;
        idle.remove(pos)
    }

    fn take_lru(&self) -> Option<Idle<M::Connection>> {
        self.idle().pop_front()
    }

    async fn close_quietly(&self, key: &str, connection: M::Connection) {
        if let Err(e) = self.manager.close(connection).await {
            log::warn!("Failed to close connection to {}: {}", key, e);
        }
    }
}

/// A bounded set of connections keyed by destination
///
/// Capacity counts every live connection. When a new one is needed and the pool is
/// full, the least recently released idle connection is closed to make room; if
/// every connection is in use the caller waits for one to be released (or fails
/// right away when blocking is disabled).
pub struct Pool<M: Manage> {
    shared: Arc<Shared<M>>,
}

impl<M: Manage> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Manage> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<M: Manage> Pool<M> {
    #[must_use]
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            shared: Arc::new(Shared {
                manager,
                config: PoolConfig { max_size, ..config },
                slots: Arc::new(Semaphore::new(max_size)),
                idle: Mutex::new(VecDeque::new()),
                released: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let max_size = self.shared.config.max_size;
        let idle = self.shared.idle().len();
        let live = max_size - self.shared.slots.available_permits();
        PoolStatus {
            max_size,
            idle,
            in_use: live.saturating_sub(idle),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Check out a connection to `key`
    ///
    /// Idle connections that turn out to be dead are closed and skipped.
    pub async fn get(&self, key: &str) -> Result<Pooled<M>, DockerError> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.timeout;

        loop {
            if shared.is_closed() {
                return Err(DockerError::PoolClosed);
            }

            // registered before looking, so a release in between is not missed
            let released = shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            while let Some(mut idle) = shared.take_idle(key) {
                if shared.manager.is_alive(&mut idle.connection).await {
                    log::trace!("Reusing idle connection to {}", key);
                    return Ok(self.lease(idle.key, idle.connection, idle.permit));
                }
                log::debug!("Idle connection to {} is dead, replacing it", key);
                shared.close_quietly(key, idle.connection).await;
            }

            if let Ok(permit) = Arc::clone(&shared.slots).try_acquire_owned() {
                return self.open(key, permit).await;
            }

            if let Some(victim) = shared.take_lru() {
                log::debug!(
                    "Pool full, evicting least recently used connection to {}",
                    victim.key
                );
                shared.close_quietly(&victim.key, victim.connection).await;
                return self.open(key, victim.permit).await;
            }

            if !shared.config.block {
                return Err(DockerError::PoolExhausted {
                    max_size: shared.config.max_size,
                });
            }

            log::trace!("Pool full, waiting for a connection to {}", key);
            tokio::select! {
                permit = Arc::clone(&shared.slots).acquire_owned() => match permit {
                    Ok(permit) => return self.open(key, permit).await,
                    Err(_) => return Err(DockerError::PoolClosed),
                },
                () = &mut released => {}
                () = tokio::time::sleep_until(deadline) => {
                    return Err(DockerError::PoolExhausted {
                        max_size: shared.config.max_size,
                    });
                }
            }
        }
    }

    async fn open(&self, key: &str, permit: OwnedSemaphorePermit) -> Result<Pooled<M>, DockerError> {
        // on failure the permit drops here and the slot frees up
        let connection = self.shared.manager.open(key).await?;
        Ok(self.lease(key.to_string(), connection, permit))
    }

    fn lease(&self, key: String, connection: M::Connection, permit: OwnedSemaphorePermit) -> Pooled<M> {
        Pooled {
            shared: Arc::clone(&self.shared),
            key,
            connection: Some(connection),
            permit: Some(permit),
        }
    }

    /// Close every idle connection and abort those in use
    ///
    /// Every connection is attempted; failures are collected into
    /// [`DockerError::Close`]. Later checkouts fail with [`DockerError::PoolClosed`].
    #[tracing::instrument(skip(self))]
    pub async fn close_all(&self) -> Result<(), DockerError> {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        shared.slots.close();
        shared.manager.abort_all();

        let idle: Vec<_> = shared.idle().drain(..).collect();
        log::debug!("Closing {} idle connection(s)", idle.len());

        let mut errors = Vec::new();
        for entry in idle {
            if let Err(e) = shared.manager.close(entry.connection).await {
                log::warn!("Failed to close connection to {}: {}", entry.key, e);
                errors.push(e);
            }
        }
        shared.released.notify_waiters();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DockerError::Close(errors))
        }
    }
}

/// A checked-out connection
///
/// Hand it back with [`Pooled::release`] once the response is fully consumed, or
/// close it with [`Pooled::discard`]. Dropping it without either closes it in the
/// background, since its state is unknown.
pub struct Pooled<M: Manage> {
    shared: Arc<Shared<M>>,
    key: String,
    connection: Option<M::Connection>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<M: Manage> Pooled<M> {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Return the connection to the idle set
    pub fn release(mut self) {
        let (Some(connection), Some(permit)) = (self.connection.take(), self.permit.take()) else {
            return;
        };

        if self.shared.is_closed() {
            spawn_close(Arc::clone(&self.shared), self.key.clone(), connection, permit);
            return;
        }

        self.shared.idle().push_back(Idle {
            key: self.key.clone(),
            connection,
            permit,
        });
        self.shared.released.notify_waiters();
    }

    /// Close the connection instead of reusing it
    pub async fn discard(mut self) {
        if let Some(connection) = self.connection.take() {
            self.shared.close_quietly(&self.key, connection).await;
        }
        drop(self.permit.take());
        self.shared.released.notify_waiters();
    }
}

fn spawn_close<M: Manage>(
    shared: Arc<Shared<M>>,
    key: String,
    connection: M::Connection,
    permit: OwnedSemaphorePermit,
) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                shared.close_quietly(&key, connection).await;
                drop(permit);
                shared.released.notify_waiters();
            });
        }
        Err(_) => {
            log::debug!("No runtime to close connection to {}, dropping it", key);
            drop(connection);
            drop(permit);
        }
    }
}

impl<M: Manage> Drop for Pooled<M> {
    fn drop(&mut self) {
        if let (Some(connection), Some(permit)) = (self.connection.take(), self.permit.take()) {
            log::trace!("Connection to {} dropped while checked out, closing it", self.key);
            spawn_close(Arc::clone(&self.shared), self.key.clone(), connection, permit);
        }
    }
}

impl<M: Manage> Deref for Pooled<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken when the lease is consumed"),
        }
    }
}

impl<M: Manage> DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken when the lease is consumed"),
        }
    }
}

impl<M: Manage> fmt::Debug for Pooled<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled").field("key", &self.key).finish_non_exhaustive()
    }
}
