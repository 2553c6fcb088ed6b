pub mod clock;
pub mod config;
pub mod content;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod queue;
pub mod scanner;
pub mod stats;
pub mod store;
pub mod supervisor;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use error::Error;
pub use ledger::{Ledger, LedgerEntry};
pub use scanner::{CandidateFile, FreshnessRule, ScanOptions};
pub use stats::CycleReport;
pub use store::{ObjectStore, StoreError};
pub use supervisor::{CycleOutcome, Supervisor};
