// Simulated execution: the cycle state machine, its logs and the loop that drives it
pub mod cycle;
pub mod journal;
pub mod polling;
pub mod price_feed;
pub mod session;

pub use cycle::{CycleRun, RunSnapshot};
pub use journal::{EventLog, PriceLog};
pub use polling::{share, PollingLoop, RunOutcome, RunReport, SharedRun, StopSignal};
pub use price_feed::{CachedPriceSource, PriceSource};
pub use session::SimulationSession;
