pub mod aggregate;
pub mod consolidate;
pub mod intent;
pub mod resolve;
pub mod sessions;
