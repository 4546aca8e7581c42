//! Premium/billing collaborator.
//!
//! The upstream contract is identified by `data/contract01/url.txt` and
//! `data/contract01/address.txt`; the premium set itself is sourced from
//! `data/contract01/premium.txt` (one textual address per line) and
//! refreshed every five seconds. Off the hot path, premium mailboxes get a
//! raised stored-frame cap. Never consulted during deposit or read.

use crate::router::registry::MailboxRegistry;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Stored-frame cap granted to premium addresses.
pub const PREMIUM_MAX_MESSAGES: usize = 100_000;

const UPDATE_PERIOD: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct BillingState {
    premium: HashSet<String>,
    counter_success: u64,
    counter_error: u64,
}

pub struct Billing {
    state: Mutex<BillingState>,
    contract_dir: PathBuf,
    stopping: Arc<AtomicBool>,
}

impl Billing {
    pub fn new(data_dir: &std::path::Path, stopping: Arc<AtomicBool>) -> Self {
        Self {
            state: Mutex::new(BillingState::default()),
            contract_dir: data_dir.join("contract01"),
            stopping,
        }
    }

    pub fn is_premium(&self, address: &str) -> bool {
        self.state.lock().expect("billing poisoned").premium.contains(address)
    }

    pub fn counters(&self) -> (u64, u64) {
        let state = self.state.lock().expect("billing poisoned");
        (state.counter_success, state.counter_error)
    }

    /// Run the refresh loop. Missing contract identity files disable the
    /// collaborator for the life of the process; the router itself is
    /// unaffected.
    pub fn spawn(self: &Arc<Self>, registry: Arc<MailboxRegistry>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = std::fs::create_dir_all(&this.contract_dir) {
                warn!("billing: cannot create {}: {}", this.contract_dir.display(), e);
                return;
            }
            let url = match std::fs::read_to_string(this.contract_dir.join("url.txt")) {
                Ok(s) => s.trim().to_string(),
                Err(e) => {
                    warn!("billing disabled: read url.txt: {}", e);
                    return;
                }
            };
            let contract = match std::fs::read_to_string(this.contract_dir.join("address.txt")) {
                Ok(s) => s.trim().to_string(),
                Err(e) => {
                    warn!("billing disabled: read address.txt: {}", e);
                    return;
                }
            };
            info!("billing contract {} via {}", contract, url);

            loop {
                this.update(&registry);
                let mut waited = Duration::ZERO;
                while waited < UPDATE_PERIOD {
                    if this.stopping.load(Ordering::Relaxed) {
                        return;
                    }
                    tokio::time::sleep(STOP_POLL).await;
                    waited += STOP_POLL;
                }
            }
        })
    }

    fn update(&self, registry: &MailboxRegistry) {
        match std::fs::read_to_string(self.contract_dir.join("premium.txt")) {
            Ok(listing) => {
                let premium: HashSet<String> = listing
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();
                for address in &premium {
                    if registry.set_mailbox_limit(address, PREMIUM_MAX_MESSAGES) {
                        debug!("raised limit for premium {}", address);
                    }
                }
                let mut state = self.state.lock().expect("billing poisoned");
                state.premium = premium;
                state.counter_success += 1;
            }
            Err(e) => {
                debug!("billing update: {}", e);
                self.state.lock().expect("billing poisoned").counter_error += 1;
            }
        }
    }
}
