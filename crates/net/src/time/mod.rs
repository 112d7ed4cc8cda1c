mod clock;
mod syncer;

pub use clock::TimeClock;
pub use syncer::{TIME_SYNC_WINDOW_SIZE, TimeSyncer};
