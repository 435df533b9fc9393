pub mod items;
pub mod orders;

pub use items::ItemsExtractor;
pub use orders::{OrderExtraction, OrdersExtractor};
