//! `facturo-parties` — buyer identity and fiscal classification.

pub mod buyer;

pub use buyer::{Buyer, BuyerId, ReceiverId, TaxCondition};
