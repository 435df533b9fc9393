pub mod loader;
pub mod models;

pub use loader::{DataLoader, LoadStats};
