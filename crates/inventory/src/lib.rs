//! `facturo-inventory` — stock items and the no-oversell invariant.

pub mod item;

pub use item::{ProductId, StockItem};
