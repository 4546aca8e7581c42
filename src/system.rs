//! Component wiring and lifecycle.

use crate::billing::Billing;
use crate::discovery::Discovery;
use crate::http::{HttpHandle, HttpTransport};
use crate::resolver::NameResolver;
use crate::router::{FrameDispatcher, MailboxRegistry, NoncePool, StatsReaper};
use crate::types::RouterConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("already started")]
    AlreadyStarted,
    #[error("already stopped")]
    AlreadyStopped,
    #[error("stop in progress")]
    Stopping,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct Running {
    http: HttpHandle,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns every long-lived component: the mailbox registry, nonce pool,
/// dispatcher, HTTP listener, discovery channel, billing loop and reaper.
/// `start`/`stop` guard double transitions with typed errors instead of
/// panics.
pub struct System {
    config: RouterConfig,
    registry: Arc<MailboxRegistry>,
    nonces: Arc<NoncePool>,
    dispatcher: Arc<FrameDispatcher>,
    discovery: Arc<Discovery>,
    billing: Arc<Billing>,
    stop_flag: Arc<AtomicBool>,
    stopping: AtomicBool,
    running: Mutex<Option<Running>>,
}

impl System {
    pub fn new(config: RouterConfig) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(MailboxRegistry::new(config.max_messages));
        let nonces = Arc::new(NoncePool::new(config.nonce_count));
        let dispatcher = Arc::new(FrameDispatcher::new(
            registry.clone(),
            nonces.clone(),
            config.require_pow_on_deposit,
        ));
        let discovery = Arc::new(Discovery::new(NameResolver::new(), stop_flag.clone()));
        let billing = Arc::new(Billing::new(&config.data_dir, stop_flag.clone()));
        Self {
            config,
            registry,
            nonces,
            dispatcher,
            discovery,
            billing,
            stop_flag,
            stopping: AtomicBool::new(false),
            running: Mutex::new(None),
        }
    }

    /// Bind the HTTP listener and launch the background tasks. Returns the
    /// bound address (useful when the configured port is 0).
    pub async fn start(&self) -> Result<SocketAddr, SystemError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SystemError::AlreadyStarted);
        }
        if self.stopping.load(Ordering::SeqCst) {
            return Err(SystemError::Stopping);
        }

        let transport = HttpTransport::new(self.dispatcher.clone(), self.discovery.clone());
        let http = transport.start(self.config.http_port).await?;
        let addr = http.local_addr();

        let tasks = vec![
            StatsReaper::new(self.registry.clone(), &self.config, self.stop_flag.clone()).spawn(),
            self.discovery.spawn(self.config.discovery_port),
            self.billing.spawn(self.registry.clone()),
        ];

        *running = Some(Running { http, tasks });
        Ok(addr)
    }

    /// Stop the listener (1 s grace) and the background tasks (one reaper
    /// tick plus the poll intervals of the slower loops).
    pub async fn stop(&self) -> Result<(), SystemError> {
        let mut running = self.running.lock().await;
        let Some(run) = running.take() else {
            return Err(SystemError::AlreadyStopped);
        };
        self.stopping.store(true, Ordering::SeqCst);
        self.stop_flag.store(true, Ordering::SeqCst);

        run.http.stop().await;
        for task in run.tasks {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                warn!("background task did not stop in time");
            }
        }

        self.stop_flag.store(false, Ordering::SeqCst);
        self.stopping.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MailboxRegistry> {
        &self.registry
    }

    pub fn nonces(&self) -> &Arc<NoncePool> {
        &self.nonces
    }

    pub fn dispatcher(&self) -> &Arc<FrameDispatcher> {
        &self.dispatcher
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    pub fn billing(&self) -> &Arc<Billing> {
        &self.billing
    }
}
