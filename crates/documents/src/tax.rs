//! Per-line VAT breakdown and per-rate aggregation.
//!
//! The authority validates amounts at line-level precision: document totals
//! are the rounded sums of per-line breakdowns, not a single rounding of
//! the aggregate.

use rust_decimal::Decimal;

use facturo_core::{breakdown, round2, DomainError, DomainResult};

use crate::document::DocumentLine;

/// Map a rate percentage to the authority's rate code.
pub fn rate_code(rate_percent: Decimal) -> DomainResult<u16> {
    let table: [(Decimal, u16); 6] = [
        (Decimal::ZERO, 3),
        (Decimal::new(25, 1), 9),
        (Decimal::from(5u32), 8),
        (Decimal::new(105, 1), 4),
        (Decimal::from(21u32), 5),
        (Decimal::from(27u32), 6),
    ];
    table
        .iter()
        .find(|(rate, _)| *rate == rate_percent)
        .map(|(_, code)| *code)
        .ok_or_else(|| {
            DomainError::validation(format!("unsupported tax rate {rate_percent}%"))
        })
}

/// One entry of the per-rate VAT array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLine {
    pub rate_percent: Decimal,
    pub net: Decimal,
    pub tax: Decimal,
}

/// Document-level totals assembled from per-line breakdowns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTotals {
    pub net: Decimal,
    pub tax: Decimal,
    pub gross: Decimal,
    pub rate_lines: Vec<RateLine>,
}

/// Break every line into net/tax and aggregate by rate.
///
/// Rate lines keep first-appearance order so the assembled payload is
/// deterministic.
pub fn vat_summary(lines: &[DocumentLine]) -> DomainResult<DocumentTotals> {
    let mut rate_lines: Vec<RateLine> = Vec::new();
    let mut net = Decimal::ZERO;
    let mut tax = Decimal::ZERO;
    let mut gross = Decimal::ZERO;

    for line in lines {
        let parts = breakdown(line.subtotal(), line.vat_rate())?;
        net += parts.net;
        tax += parts.tax;
        gross += line.subtotal();

        match rate_lines
            .iter_mut()
            .find(|rl| rl.rate_percent == line.vat_rate())
        {
            Some(rl) => {
                rl.net += parts.net;
                rl.tax += parts.tax;
            }
            None => rate_lines.push(RateLine {
                rate_percent: line.vat_rate(),
                net: parts.net,
                tax: parts.tax,
            }),
        }
    }

    Ok(DocumentTotals {
        net: round2(net),
        tax: round2(tax),
        gross: round2(gross),
        rate_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facturo_core::EntityId;
    use facturo_inventory::ProductId;
    use rust_decimal_macros::dec;

    fn line(no: u32, quantity: Decimal, unit_price: Decimal, rate: Decimal) -> DocumentLine {
        DocumentLine::new(
            no,
            ProductId::new(EntityId::new()),
            format!("item {no}"),
            quantity,
            unit_price,
            rate,
        )
        .unwrap()
    }

    #[test]
    fn rate_codes_match_authority_table() {
        assert_eq!(rate_code(dec!(0)).unwrap(), 3);
        assert_eq!(rate_code(dec!(10.5)).unwrap(), 4);
        assert_eq!(rate_code(dec!(21)).unwrap(), 5);
        assert_eq!(rate_code(dec!(27)).unwrap(), 6);
    }

    #[test]
    fn unknown_rate_is_rejected() {
        let err = rate_code(dec!(13)).unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("unsupported") => {}
            _ => panic!("Expected Validation error for unknown rate"),
        }
    }

    #[test]
    fn single_rate_summary_matches_fixed_point() {
        let lines = vec![line(1, dec!(1), dec!(1210.00), dec!(21))];
        let totals = vat_summary(&lines).unwrap();
        assert_eq!(totals.net, dec!(1000.00));
        assert_eq!(totals.tax, dec!(210.00));
        assert_eq!(totals.gross, dec!(1210.00));
        assert_eq!(totals.rate_lines.len(), 1);
    }

    #[test]
    fn mixed_rates_aggregate_per_rate() {
        let lines = vec![
            line(1, dec!(1), dec!(121.00), dec!(21)),
            line(2, dec!(1), dec!(110.50), dec!(10.5)),
            line(3, dec!(2), dec!(60.50), dec!(21)),
        ];
        let totals = vat_summary(&lines).unwrap();

        assert_eq!(totals.rate_lines.len(), 2);
        let at_21 = &totals.rate_lines[0];
        assert_eq!(at_21.rate_percent, dec!(21));
        assert_eq!(at_21.net, dec!(200.00));
        assert_eq!(at_21.tax, dec!(42.00));

        let at_10_5 = &totals.rate_lines[1];
        assert_eq!(at_10_5.net, dec!(100.00));
        assert_eq!(at_10_5.tax, dec!(10.50));

        assert_eq!(totals.gross, dec!(352.50));
        assert_eq!(totals.net + totals.tax, totals.gross);
    }

    #[test]
    fn empty_lines_sum_to_zero() {
        let totals = vat_summary(&[]).unwrap();
        assert_eq!(totals.gross, Decimal::ZERO);
        assert!(totals.rate_lines.is_empty());
    }
}
