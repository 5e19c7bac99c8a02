//! The shared buffer and its per-queue bookkeeping.
//!
//! A [`BufferPool`] is one finite block of memory carved into many [`VirtualQueue`]s, one per
//! output port × priority class. Each queue's admission threshold lives in the
//! [`AllocationLedger`]; feedback for threshold adaptation is gathered in a
//! [`MonitoringWindow`].

mod id;
mod ledger;
mod pool;
mod queue;
mod window;

pub use id::{FlowId, QueueId, QueueLayout};
pub use ledger::{AllocationLedger, LedgerEntry, Membership, ThresholdChange};
pub use pool::{BufferPool, DEFAULT_SMOOTHING_HISTORY};
pub use queue::{OccupancySampler, SmoothingMode, VirtualQueue};
pub use window::{MonitoringWindow, WindowSnapshot};
