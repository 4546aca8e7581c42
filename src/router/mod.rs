//! Router core: mailbox store, nonce service, frame dispatch, reaping.

pub mod dispatcher;
pub mod mailbox;
pub mod nonce;
pub mod pow;
pub mod registry;
pub mod reaper;

pub use dispatcher::FrameDispatcher;
pub use mailbox::{Mailbox, ReadResult};
pub use nonce::{Nonce, NoncePool};
pub use pow::{PowError, check_hash, verify_deposit};
pub use reaper::StatsReaper;
pub use registry::{DebugSnapshot, MailboxCount, MailboxRegistry, Traffic, TrafficRates};
