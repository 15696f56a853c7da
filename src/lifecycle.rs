//! Startup and shutdown sequencing around the store connection.
//!
//! The manager owns two values: the process [`Phase`] and the [`StoreState`]
//! reported by `/healthz`. Both live in `watch` channels so readers get a
//! cheap, always-current view without sharing mutable state.

use std::{
    future::IntoFuture,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::Router;
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch};
use tracing::{debug, error, info, warn};

use crate::{
    shutdown::ShutdownSignal,
    store::{Store, StoreError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Serving,
    Draining,
    Closed,
    Failed,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Draining)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connecting, Draining)
                | (Connected, Serving)
                | (Connected, Draining)
                | (Serving, Draining)
                | (Draining, Closed)
        )
    }
}

/// Store connection state, encoded 0..=4 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreState {
    Disconnected = 0,
    Connected = 1,
    Connecting = 2,
    Disconnecting = 3,
    Unauthorized = 4,
}

impl StoreState {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },
    #[error("store connection failed: {0}")]
    Connect(#[source] StoreError),
    #[error("http server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Writer side of the store state; cloned into the driver's event monitor.
#[derive(Clone)]
pub struct StoreTracker {
    tx: Arc<watch::Sender<StoreState>>,
    /// Set by a successful handshake, cleared when the store is closed.
    /// Heartbeats never report a connection outside that window.
    established: Arc<AtomicBool>,
}

impl StoreTracker {
    fn new() -> Self {
        let (tx, _) = watch::channel(StoreState::Disconnected);
        Self {
            tx: Arc::new(tx),
            established: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn current(&self) -> StoreState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.tx.subscribe()
    }

    fn set(&self, state: StoreState) {
        self.tx.send_replace(state);
    }

    /// Connection lost while connected. Observational only; nothing retries.
    pub fn heartbeat_failed(&self, server: &str, reason: &str) {
        let lost = self.tx.send_if_modified(|state| {
            if *state == StoreState::Connected {
                *state = StoreState::Disconnected;
                true
            } else {
                false
            }
        });
        if lost {
            warn!(%server, %reason, "store disconnected");
        }
    }

    /// Reconnect after a loss. Ignored before the handshake and after close.
    pub fn heartbeat_ok(&self, server: &str) {
        let recovered = self.tx.send_if_modified(|state| {
            if *state == StoreState::Disconnected && self.established.load(Ordering::Acquire) {
                *state = StoreState::Connected;
                true
            } else {
                false
            }
        });
        if recovered {
            info!(%server, "store reconnected");
        }
    }
}

pub struct Lifecycle {
    phase: Arc<watch::Sender<Phase>>,
    store: StoreTracker,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            phase: Arc::new(phase),
            store: StoreTracker::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn store_tracker(&self) -> StoreTracker {
        self.store.clone()
    }

    /// Read-only view handed to the health endpoint.
    pub fn store_status(&self) -> watch::Receiver<StoreState> {
        self.store.subscribe()
    }

    /// `Idle -> Connecting -> Connected | Failed`.
    pub async fn connect<S: Store + ?Sized>(&self, store: &S) -> Result<(), LifecycleError> {
        advance(&self.phase, Phase::Connecting)?;
        self.store.set(StoreState::Connecting);

        match store.ping().await {
            Ok(()) => {
                self.store.established.store(true, Ordering::Release);
                self.store.set(StoreState::Connected);
                advance(&self.phase, Phase::Connected)?;
                info!("store connected");
                Ok(())
            }
            Err(e) => {
                let state = match e {
                    StoreError::Unauthorized(_) => StoreState::Unauthorized,
                    _ => StoreState::Disconnected,
                };
                self.store.set(state);
                // Connecting -> Failed is always legal here.
                let _ = advance(&self.phase, Phase::Failed);
                error!(error = %e, "store connection error");
                Err(LifecycleError::Connect(e))
            }
        }
    }

    /// `Connected -> Serving -> Draining -> Closed`.
    ///
    /// Serves `app` until `shutdown` resolves, lets in-flight requests finish
    /// (bounded by `drain_timeout` when set), and only then closes the store.
    /// The store is closed on every exit path, server errors included.
    pub async fn serve<S, F>(
        &self,
        listener: TcpListener,
        app: Router,
        store: &S,
        shutdown: F,
        drain_timeout: Option<Duration>,
    ) -> Result<(), LifecycleError>
    where
        S: Store + ?Sized,
        F: std::future::Future<Output = ShutdownSignal> + Send + 'static,
    {
        advance(&self.phase, Phase::Serving)?;

        let phase = Arc::clone(&self.phase);
        let signal = async move {
            let signal = shutdown.await;
            info!(%signal, "shutdown signal received");
            if advance(&phase, Phase::Draining).is_err() {
                debug!(%signal, "already draining");
            }
        };

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .into_future();
        let mut phase_rx = self.phase.subscribe();

        let served = tokio::select! {
            res = server => res.map_err(LifecycleError::Serve),
            _ = drain_deadline(&mut phase_rx, drain_timeout) => {
                warn!(timeout = ?drain_timeout, "drain timed out; closing store with requests in flight");
                Ok(())
            }
        };

        if let Err(e) = &served {
            error!(error = %e, "http server stopped unexpectedly");
            if self.phase() == Phase::Serving {
                let _ = advance(&self.phase, Phase::Draining);
            }
        } else {
            info!("http listener closed");
        }

        self.close_store(Some(store)).await;
        served
    }

    /// Drain entered before the listener was ever bound.
    pub async fn shutdown_before_serving<S: Store + ?Sized>(
        &self,
        signal: ShutdownSignal,
        store: Option<&S>,
    ) -> Result<(), LifecycleError> {
        info!(%signal, "shutdown signal received before serving");
        advance(&self.phase, Phase::Draining)?;
        self.close_store(store).await;
        Ok(())
    }

    /// Startup failed after the store connected; release it and stop.
    pub async fn abort_startup<S: Store + ?Sized>(&self, store: &S) {
        warn!("aborting startup");
        if advance(&self.phase, Phase::Draining).is_err() {
            debug!(phase = ?self.phase(), "abort outside of startup");
        }
        self.close_store(Some(store)).await;
    }

    async fn close_store<S: Store + ?Sized>(&self, store: Option<&S>) {
        if let Some(store) = store {
            if self.store.current() == StoreState::Disconnected {
                warn!("closing store after the connection was already lost");
            }
            self.store.established.store(false, Ordering::Release);
            self.store.set(StoreState::Disconnecting);
            store.close().await;
            info!("store connection closed");
        }
        self.store.set(StoreState::Disconnected);
        if advance(&self.phase, Phase::Closed).is_ok() {
            info!("shutdown complete");
        }
    }
}

fn advance(phase: &watch::Sender<Phase>, to: Phase) -> Result<Phase, LifecycleError> {
    let mut from = Phase::Idle;
    let applied = phase.send_if_modified(|current| {
        from = *current;
        if current.can_transition_to(to) {
            *current = to;
            true
        } else {
            false
        }
    });
    if applied {
        debug!(?from, ?to, "lifecycle transition");
        Ok(from)
    } else {
        debug!(?from, ?to, "lifecycle transition rejected");
        Err(LifecycleError::InvalidTransition { from, to })
    }
}

/// Resolves `timeout` after draining starts; never resolves without one.
async fn drain_deadline(phase: &mut watch::Receiver<Phase>, timeout: Option<Duration>) {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };
    if phase.wait_for(|p| *p == Phase::Draining).await.is_err() {
        return std::future::pending().await;
    }
    tokio::time::sleep(timeout).await;
}
