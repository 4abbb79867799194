pub mod check;
pub mod classify;
pub mod daemon;
pub mod query;
