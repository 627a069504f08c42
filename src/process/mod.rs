// src/process/mod.rs
pub mod header;
pub mod mapper;
pub mod percent;
pub mod replicate;
pub mod utils;
pub mod worker;

pub use header::HeaderMap;
pub use mapper::{parse_taxable, RowMapper, RowOutput, Side};
pub use percent::parse_percent;
pub use replicate::replicate_state_treatments;
pub use worker::{DocumentOutput, WorkerContext};
