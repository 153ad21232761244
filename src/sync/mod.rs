//! Client Synchronization
//!
//! Everything the client needs to stay on the server's tick timeline while
//! rendering locally predicted ticks ahead of confirmation.
//!
//! ```text
//! server ──confirmations──▶ InputLedger ──▶ reconcile ──▶ Timeline ──▶ state
//!                                              ▲             │
//!                                    Predictor ┘   snapshots, used bundles,
//!                                                  marks, event journal
//! ```
//!
//! [`ClientSession`] is the single owner of all of it. Nothing here touches
//! the network or the clock; the caller feeds elapsed time and queued server
//! messages into [`ClientSession::advance_frame`].

pub mod window;
pub mod ledger;
pub mod snapshot;
pub mod prediction;
pub mod journal;
pub mod timeline;
pub mod reconcile;
pub mod catchup;
pub mod session;

pub use window::TickWindow;
pub use ledger::{InputLedger, LedgerError, PutOutcome};
pub use snapshot::SnapshotStore;
pub use prediction::{InputSource, PredictionMode, PredictionMarks, Predictor};
pub use journal::{EventJournal, JournalDelta};
pub use timeline::{Advanced, AdvancedTick, Timeline};
pub use reconcile::{RollbackError, Verdict};
pub use catchup::{CatchupConfig, CatchupController, FramePlan};
pub use session::{ClientSession, FrameReport, Inbound, Outbound, SyncConfig, SyncError};
