//! Marketplace catalog and order ETL: pulls a seller's listings and orders
//! from the Mercado Libre REST API, flattens them, and loads them into a
//! SQLite star schema.

pub mod api;
pub mod config;
pub mod db;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod types;
