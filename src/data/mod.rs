//! In-memory series and on-disk sessions.
pub mod series;
pub mod storage;
