pub mod bundle;
pub mod core;
pub mod dedupe;
pub mod import;
pub mod sessions;
pub mod setup;
pub mod staff;
pub mod units;
