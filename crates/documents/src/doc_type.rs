//! Document type table: classes, external codes, numbering prefixes.

use serde::{Deserialize, Serialize};

/// Fiscal class of a document, driven by the buyer's tax condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentClass {
    A,
    B,
    C,
}

/// What a document does to stock when it is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    /// Goods leave the store (invoices, delivery notes).
    Deduct,
    /// Goods come back (credit notes).
    Restock,
    /// No goods movement (debit notes).
    None,
}

/// Every document type this engine issues.
///
/// Each type is its own numbering family: the human-facing number sequence
/// is keyed by the type's prefix and never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    InvoiceA,
    InvoiceB,
    InvoiceC,
    DebitNoteA,
    DebitNoteB,
    DebitNoteC,
    CreditNoteA,
    CreditNoteB,
    CreditNoteC,
    DeliveryNote,
}

impl DocumentType {
    pub const ALL: [DocumentType; 10] = [
        DocumentType::InvoiceA,
        DocumentType::InvoiceB,
        DocumentType::InvoiceC,
        DocumentType::DebitNoteA,
        DocumentType::DebitNoteB,
        DocumentType::DebitNoteC,
        DocumentType::CreditNoteA,
        DocumentType::CreditNoteB,
        DocumentType::CreditNoteC,
        DocumentType::DeliveryNote,
    ];

    /// Numeric voucher-type code the authority recognizes.
    pub fn external_code(self) -> u16 {
        match self {
            DocumentType::InvoiceA => 1,
            DocumentType::DebitNoteA => 2,
            DocumentType::CreditNoteA => 3,
            DocumentType::InvoiceB => 6,
            DocumentType::DebitNoteB => 7,
            DocumentType::CreditNoteB => 8,
            DocumentType::InvoiceC => 11,
            DocumentType::DebitNoteC => 12,
            DocumentType::CreditNoteC => 13,
            DocumentType::DeliveryNote => 91,
        }
    }

    /// Numbering prefix for this type's sequence.
    pub fn prefix(self) -> &'static str {
        match self {
            DocumentType::InvoiceA => "FA-",
            DocumentType::InvoiceB => "FB-",
            DocumentType::InvoiceC => "FC-",
            DocumentType::DebitNoteA => "NDA-",
            DocumentType::DebitNoteB => "NDB-",
            DocumentType::DebitNoteC => "NDC-",
            DocumentType::CreditNoteA => "NCA-",
            DocumentType::CreditNoteB => "NCB-",
            DocumentType::CreditNoteC => "NCC-",
            DocumentType::DeliveryNote => "RM-",
        }
    }

    pub fn class(self) -> Option<DocumentClass> {
        match self {
            DocumentType::InvoiceA | DocumentType::DebitNoteA | DocumentType::CreditNoteA => {
                Some(DocumentClass::A)
            }
            DocumentType::InvoiceB | DocumentType::DebitNoteB | DocumentType::CreditNoteB => {
                Some(DocumentClass::B)
            }
            DocumentType::InvoiceC | DocumentType::DebitNoteC | DocumentType::CreditNoteC => {
                Some(DocumentClass::C)
            }
            DocumentType::DeliveryNote => None,
        }
    }

    /// Delivery notes are purely commercial; everything else needs the
    /// authority's code before it is fiscally valid.
    pub fn requires_authorization(self) -> bool {
        self != DocumentType::DeliveryNote
    }

    pub fn is_invoice(self) -> bool {
        matches!(
            self,
            DocumentType::InvoiceA | DocumentType::InvoiceB | DocumentType::InvoiceC
        )
    }

    pub fn is_credit_note(self) -> bool {
        matches!(
            self,
            DocumentType::CreditNoteA | DocumentType::CreditNoteB | DocumentType::CreditNoteC
        )
    }

    pub fn is_debit_note(self) -> bool {
        matches!(
            self,
            DocumentType::DebitNoteA | DocumentType::DebitNoteB | DocumentType::DebitNoteC
        )
    }

    pub fn stock_effect(self) -> StockEffect {
        match self {
            t if t.is_invoice() => StockEffect::Deduct,
            DocumentType::DeliveryNote => StockEffect::Deduct,
            t if t.is_credit_note() => StockEffect::Restock,
            _ => StockEffect::None,
        }
    }

    /// The credit note that reverses an invoice of the same class.
    pub fn credit_note_for(class: DocumentClass) -> DocumentType {
        match class {
            DocumentClass::A => DocumentType::CreditNoteA,
            DocumentClass::B => DocumentType::CreditNoteB,
            DocumentClass::C => DocumentType::CreditNoteC,
        }
    }

    /// The invoice family a credit/debit note associates to.
    pub fn invoice_for(class: DocumentClass) -> DocumentType {
        match class {
            DocumentClass::A => DocumentType::InvoiceA,
            DocumentClass::B => DocumentType::InvoiceB,
            DocumentClass::C => DocumentType::InvoiceC,
        }
    }

    /// Render the human-facing number: prefix + zero-padded integer.
    pub fn format_number(self, n: u64) -> String {
        format!("{}{:08}", self.prefix(), n)
    }

    /// Parse the trailing integer back out of a rendered number.
    pub fn parse_number(self, number: &str) -> Option<u64> {
        number.strip_prefix(self.prefix())?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_codes_are_unique() {
        let mut codes: Vec<u16> = DocumentType::ALL.iter().map(|t| t.external_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), DocumentType::ALL.len());
    }

    #[test]
    fn prefixes_are_unique() {
        let mut prefixes: Vec<&str> = DocumentType::ALL.iter().map(|t| t.prefix()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), DocumentType::ALL.len());
    }

    #[test]
    fn invoice_a_renders_expected_number() {
        assert_eq!(DocumentType::InvoiceA.format_number(1), "FA-00000001");
        assert_eq!(DocumentType::InvoiceA.format_number(2), "FA-00000002");
    }

    #[test]
    fn parse_number_roundtrips() {
        for t in DocumentType::ALL {
            assert_eq!(t.parse_number(&t.format_number(42)), Some(42));
        }
    }

    #[test]
    fn parse_number_rejects_foreign_prefix() {
        assert_eq!(DocumentType::InvoiceB.parse_number("FA-00000001"), None);
    }

    #[test]
    fn credit_note_matches_invoice_family() {
        assert_eq!(
            DocumentType::credit_note_for(DocumentClass::A),
            DocumentType::CreditNoteA
        );
        assert_eq!(
            DocumentType::invoice_for(DocumentClass::A).external_code(),
            1
        );
    }

    #[test]
    fn only_delivery_note_skips_authorization() {
        for t in DocumentType::ALL {
            assert_eq!(
                t.requires_authorization(),
                t != DocumentType::DeliveryNote,
                "{t:?}"
            );
        }
    }

    #[test]
    fn stock_effects_by_family() {
        assert_eq!(DocumentType::InvoiceA.stock_effect(), StockEffect::Deduct);
        assert_eq!(DocumentType::DeliveryNote.stock_effect(), StockEffect::Deduct);
        assert_eq!(DocumentType::CreditNoteB.stock_effect(), StockEffect::Restock);
        assert_eq!(DocumentType::DebitNoteC.stock_effect(), StockEffect::None);
    }
}
