use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use facturo_core::{DomainError, DomainResult, Entity, EntityId};

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub EntityId);

impl ProductId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Entity: StockItem.
///
/// Tracks the on-hand quantity for one product. Invariant: stock never
/// goes negative; a sale that would oversell is refused before any
/// mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    product_id: ProductId,
    name: String,
    on_hand: Decimal,
}

impl StockItem {
    pub fn new(
        product_id: ProductId,
        name: impl Into<String>,
        on_hand: Decimal,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if on_hand < Decimal::ZERO {
            return Err(DomainError::invariant("stock cannot be negative"));
        }
        Ok(Self {
            product_id,
            name,
            on_hand,
        })
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_hand(&self) -> Decimal {
        self.on_hand
    }

    /// Whether a requested quantity can be fulfilled from stock.
    pub fn can_fulfill(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO && self.on_hand >= quantity
    }

    /// Remove sold goods from stock.
    pub fn deduct(&mut self, quantity: Decimal) -> DomainResult<()> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if self.on_hand < quantity {
            return Err(DomainError::invariant(format!(
                "stock cannot go negative (on hand {}, requested {quantity})",
                self.on_hand
            )));
        }
        self.on_hand -= quantity;
        Ok(())
    }

    /// Return goods to stock (credit note, supplier delivery).
    pub fn restock(&mut self, quantity: Decimal) -> DomainResult<()> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("quantity must be positive"));
        }
        self.on_hand += quantity;
        Ok(())
    }
}

impl Entity for StockItem {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }
}
