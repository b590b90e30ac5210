//! Training history: Round Records and their durable log.

pub mod record;
pub mod round_log;

pub use record::RoundRecord;
pub use round_log::RoundLog;
