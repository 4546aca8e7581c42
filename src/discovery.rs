//! UDP peer-discovery side channel.
//!
//! Peers announce themselves by sending their textual address as a bare
//! datagram; the router remembers the sender's socket address. The
//! resulting table is the "network view" served at `/api/n`.

use crate::resolver::NameResolver;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct NetworkRecord {
    pub address: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkView {
    pub items: Vec<NetworkRecord>,
}

pub struct Discovery {
    table: Mutex<HashMap<String, String>>,
    resolver: NameResolver,
    stopping: Arc<AtomicBool>,
}

impl Discovery {
    pub fn new(resolver: NameResolver, stopping: Arc<AtomicBool>) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            resolver,
            stopping,
        }
    }

    /// Listen for announcements on `port` until the stop flag is raised.
    pub fn spawn(self: &Arc<Self>, port: u16) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let socket = match UdpSocket::bind(("0.0.0.0", port)).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("discovery bind failed on :{}: {}", port, e);
                    return;
                }
            };
            info!("discovery listening on :{}", port);

            let mut buffer = [0u8; 1024];
            while !this.stopping.load(Ordering::Relaxed) {
                let received =
                    tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut buffer)).await;
                match received {
                    Err(_) => continue, // timeout: re-check the stop flag
                    Ok(Err(e)) => {
                        warn!("discovery recv error: {}", e);
                        break;
                    }
                    Ok(Ok((len, peer))) => {
                        let Ok(announce) = std::str::from_utf8(&buffer[..len]) else {
                            continue;
                        };
                        let announce = announce.trim();
                        if announce.is_empty() {
                            continue;
                        }
                        debug!("discovery: {} at {}", announce, peer);
                        this.record(announce, &peer.to_string());
                    }
                }
            }
            info!("discovery stopped");
        })
    }

    pub fn record(&self, address: &str, endpoint: &str) {
        let mut table = self.table.lock().expect("discovery poisoned");
        table.insert(address.to_string(), endpoint.to_string());
    }

    /// Look up an endpoint by address or name. Tries the raw key, the
    /// `#`-prefixed key, then whatever the resolver maps the name to.
    pub fn lookup(&self, query: &str) -> Option<String> {
        let table = self.table.lock().expect("discovery poisoned");
        if let Some(endpoint) = table.get(query) {
            return Some(endpoint.clone());
        }
        if let Some(endpoint) = table.get(&format!("#{query}")) {
            return Some(endpoint.clone());
        }
        drop(table);
        let resolved = self.resolver.resolve(query).ok()?;
        self.table
            .lock()
            .expect("discovery poisoned")
            .get(&resolved)
            .cloned()
    }

    /// The network view JSON: every known announcement, sorted by address.
    pub fn state_json(&self) -> Vec<u8> {
        let table = self.table.lock().expect("discovery poisoned");
        let mut addresses: Vec<&String> = table.keys().collect();
        addresses.sort();
        let view = NetworkView {
            items: addresses
                .into_iter()
                .map(|address| NetworkRecord {
                    address: address.clone(),
                    endpoint: table[address].clone(),
                })
                .collect(),
        };
        serde_json::to_vec_pretty(&view).unwrap_or_else(|_| b"{}".to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery() -> Discovery {
        Discovery::new(NameResolver::new(), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_record_and_lookup() {
        let d = discovery();
        d.record("#someaddr", "1.2.3.4:9000");
        assert_eq!(d.lookup("#someaddr").unwrap(), "1.2.3.4:9000");
        assert_eq!(d.lookup("someaddr").unwrap(), "1.2.3.4:9000");
        assert!(d.lookup("#other").is_none());
    }

    #[test]
    fn test_lookup_via_resolver() {
        let d = discovery();
        d.record("#kqfc2fwogggtlsf7vnh46hhgdjmheiqvqycapj2f2xe2d5jz", "5.6.7.8:8585");
        assert_eq!(d.lookup("relay01.rdv").unwrap(), "5.6.7.8:8585");
    }

    #[test]
    fn test_state_json_sorted() {
        let d = discovery();
        d.record("#bbb", "2.2.2.2:1");
        d.record("#aaa", "1.1.1.1:1");
        let view: serde_json::Value = serde_json::from_slice(&d.state_json()).unwrap();
        let items = view["items"].as_array().unwrap();
        assert_eq!(items[0]["address"], "#aaa");
        assert_eq!(items[1]["address"], "#bbb");
    }
}
