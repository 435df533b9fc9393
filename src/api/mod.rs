pub mod client;
pub mod rate;
pub mod token_store;
