pub mod billing;
pub mod discovery;
pub mod frame;
pub mod http;
pub mod resolver;
pub mod router;
pub mod service;
pub mod system;
pub mod types;

pub use billing::{Billing, PREMIUM_MAX_MESSAGES};
pub use discovery::{Discovery, NetworkRecord, NetworkView};
pub use http::{HttpHandle, HttpTransport};
pub use resolver::{NameResolver, ResolveError};
pub use router::{
    DebugSnapshot, FrameDispatcher, Mailbox, MailboxCount, MailboxRegistry, Nonce, NoncePool,
    PowError, ReadResult, StatsReaper, Traffic, TrafficRates, check_hash, verify_deposit,
};
pub use system::{System, SystemError};
pub use types::*;
