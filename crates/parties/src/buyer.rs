use serde::{Deserialize, Serialize};

use facturo_core::{DomainError, DomainResult, Entity, EntityId};

/// Buyer identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuyerId(pub EntityId);

impl BuyerId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BuyerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Fiscal condition the buyer declared to the tax authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxCondition {
    /// Registered business, entitled to class-A documents.
    RegisteredBusiness,
    /// End consumer, receives class-B/C documents.
    FinalConsumer,
    /// Tax-exempt entity, receives class-B/C documents.
    ExemptEntity,
}

/// How the buyer identifies itself on a fiscal document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "number", rename_all = "snake_case")]
pub enum ReceiverId {
    /// Registered tax id (11 digits with mod-11 check digit).
    TaxId(String),
    /// National identity number (7-8 digits).
    NationalId(String),
    /// No identification provided (walk-in consumer).
    Anonymous,
}

impl ReceiverId {
    /// Digits the authority expects on the wire; "0" for anonymous buyers.
    pub fn number(&self) -> &str {
        match self {
            ReceiverId::TaxId(n) | ReceiverId::NationalId(n) => n,
            ReceiverId::Anonymous => "0",
        }
    }
}

/// Entity: Buyer.
///
/// A snapshot of the buyer data a fiscal document needs; the full customer
/// record (addresses, contacts) is managed by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    id: BuyerId,
    name: String,
    tax_condition: TaxCondition,
    receiver: ReceiverId,
}

impl Buyer {
    pub fn new(
        id: BuyerId,
        name: impl Into<String>,
        tax_condition: TaxCondition,
        receiver: ReceiverId,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("buyer name cannot be empty"));
        }

        match &receiver {
            ReceiverId::TaxId(number) => validate_tax_id(number)?,
            ReceiverId::NationalId(number) => validate_national_id(number)?,
            ReceiverId::Anonymous => {}
        }

        // A registered business must identify itself with its tax id.
        if tax_condition == TaxCondition::RegisteredBusiness
            && !matches!(receiver, ReceiverId::TaxId(_))
        {
            return Err(DomainError::validation(
                "a registered business buyer must provide a tax id",
            ));
        }

        Ok(Self {
            id,
            name,
            tax_condition,
            receiver,
        })
    }

    pub fn id_typed(&self) -> BuyerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tax_condition(&self) -> TaxCondition {
        self.tax_condition
    }

    pub fn receiver(&self) -> &ReceiverId {
        &self.receiver
    }
}

impl Entity for Buyer {
    type Id = BuyerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Validate an 11-digit tax id with its mod-11 check digit.
fn validate_tax_id(number: &str) -> DomainResult<()> {
    if number.len() != 11 || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::validation(format!(
            "tax id must be 11 digits, got '{number}'"
        )));
    }

    const WEIGHTS: [u32; 10] = [5, 4, 3, 2, 7, 6, 5, 4, 3, 2];
    let digits: Vec<u32> = number.bytes().map(|b| u32::from(b - b'0')).collect();
    let sum: u32 = digits[..10]
        .iter()
        .zip(WEIGHTS.iter())
        .map(|(d, w)| d * w)
        .sum();
    let check = match 11 - (sum % 11) {
        11 => 0,
        10 => 9,
        n => n,
    };

    if digits[10] != check {
        return Err(DomainError::validation(format!(
            "tax id '{number}' has an invalid check digit"
        )));
    }
    Ok(())
}

/// Validate a 7-8 digit national identity number.
fn validate_national_id(number: &str) -> DomainResult<()> {
    let ok = (7..=8).contains(&number.len())
        && number.bytes().all(|b| b.is_ascii_digit())
        && number.bytes().any(|b| b != b'0');
    if !ok {
        return Err(DomainError::validation(format!(
            "national id must be 7-8 digits, got '{number}'"
        )));
    }
    Ok(())
}
