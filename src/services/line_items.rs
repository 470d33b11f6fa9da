//! Line-item normalization. Pallets are sold by the pallet but stored in bags so
//! that every order reports volume in the same unit.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::entities::{BusinessUnit, LineUnit, OrderSource};
use crate::errors::ServiceError;

/// A line as it arrives from a CSV row, a webhook, the platform or a staff form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LineInput {
    #[validate(length(max = 100))]
    pub sku: Option<String>,
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    #[validate(custom = "validate_positive")]
    pub quantity: Decimal,
    /// Free-form unit: `bag`, `each`, `pallet`, `plt`, ...
    pub unit: Option<String>,
    pub unit_price: Option<Decimal>,
    /// Line total; computed from quantity and unit price when absent
    pub total: Option<Decimal>,
}

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_positive"))
    }
}

impl LineInput {
    pub fn new(description: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            sku: None,
            description: description.into(),
            quantity,
            unit: None,
            unit_price: Some(unit_price),
            total: None,
        }
    }
}

/// A line ready to be stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLine {
    pub sku: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit: LineUnit,
    pub pallet_quantity: Option<Decimal>,
    pub unit_price: Decimal,
    pub total: Decimal,
}

fn normalized_unit(raw: Option<&str>) -> String {
    raw.unwrap_or_default()
        .trim()
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

pub fn is_pallet_line(line: &LineInput) -> bool {
    let unit = normalized_unit(line.unit.as_deref());
    if matches!(unit.as_str(), "pallet" | "pallets" | "plt" | "pal") {
        return true;
    }
    let sku = line
        .sku
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_ascii_uppercase();
    if sku.ends_with("-PAL") || sku.ends_with("-PALLET") {
        return true;
    }
    line.description.to_ascii_lowercase().contains("pallet")
}

fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn out_of_range(description: &str) -> ServiceError {
    ServiceError::ValidationError(format!(
        "line '{}' has a quantity or price out of range",
        description.trim()
    ))
}

/// Renormalizes one line. Pallet lines become `pallets × bags_per_pallet` bags
/// at the per-bag price (4 dp); the line total is preserved. Amounts too large
/// for a decimal are a validation error.
pub fn normalize_line(line: &LineInput, bags_per_pallet: u32) -> Result<NormalizedLine, ServiceError> {
    let quantity = line.quantity;
    let unit_price = match (line.unit_price, line.total) {
        (Some(price), _) => price,
        (None, Some(total)) if !quantity.is_zero() => total
            .checked_div(quantity)
            .ok_or_else(|| out_of_range(&line.description))?,
        _ => Decimal::ZERO,
    };
    let total = match line.total {
        Some(total) => total,
        None => money(
            quantity
                .checked_mul(unit_price)
                .ok_or_else(|| out_of_range(&line.description))?,
        ),
    };
    let sku = line
        .sku
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let description = line.description.trim().to_string();

    if is_pallet_line(line) && bags_per_pallet > 0 {
        let bags = Decimal::from(bags_per_pallet);
        let quantity_in_bags = quantity
            .checked_mul(bags)
            .ok_or_else(|| out_of_range(&line.description))?;
        let bag_price = unit_price
            .checked_div(bags)
            .ok_or_else(|| out_of_range(&line.description))?;
        return Ok(NormalizedLine {
            sku,
            description,
            quantity: quantity_in_bags,
            unit: LineUnit::Bag,
            pallet_quantity: Some(quantity),
            unit_price: bag_price.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero),
            total,
        });
    }

    let unit = match normalized_unit(line.unit.as_deref()).as_str() {
        "bag" | "bags" | "bg" => LineUnit::Bag,
        _ => LineUnit::Each,
    };
    Ok(NormalizedLine {
        sku,
        description,
        quantity,
        unit,
        pallet_quantity: None,
        unit_price: unit_price.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero),
        total,
    })
}

/// Normalized lines plus whether any of them was a pallet line
pub fn normalize_lines(
    lines: &[LineInput],
    bags_per_pallet: u32,
) -> Result<(Vec<NormalizedLine>, bool), ServiceError> {
    let any_pallet = lines.iter().any(is_pallet_line);
    let normalized = lines
        .iter()
        .map(|line| normalize_line(line, bags_per_pallet))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((normalized, any_pallet))
}

pub fn subtotal(lines: &[NormalizedLine]) -> Result<Decimal, ServiceError> {
    lines.iter().try_fold(Decimal::ZERO, |sum, line| {
        sum.checked_add(line.total).ok_or_else(|| {
            ServiceError::ValidationError("line totals add up to more than can be stored".into())
        })
    })
}

/// An explicit unit wins; otherwise pallet lines make a pallet order; otherwise the source default
pub fn order_business_unit(
    source: OrderSource,
    explicit: Option<BusinessUnit>,
    any_pallet: bool,
) -> BusinessUnit {
    match explicit {
        Some(unit) => unit,
        None if any_pallet => BusinessUnit::Pallet,
        None => source.default_business_unit(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn line(unit: Option<&str>, sku: Option<&str>, description: &str) -> LineInput {
        LineInput {
            sku: sku.map(str::to_string),
            description: description.to_string(),
            quantity: dec!(2),
            unit: unit.map(str::to_string),
            unit_price: Some(dec!(500)),
            total: None,
        }
    }

    #[rstest]
    #[case(Some("pallet"), None, "Topsoil")]
    #[case(Some("Pallets"), None, "Topsoil")]
    #[case(Some("PLT."), None, "Topsoil")]
    #[case(Some("pal"), None, "Topsoil")]
    #[case(None, Some("TS-40-PAL"), "Topsoil")]
    #[case(None, Some("ts-40-pallet"), "Topsoil")]
    #[case(None, None, "Topsoil (full pallet)")]
    fn pallet_detection(
        #[case] unit: Option<&str>,
        #[case] sku: Option<&str>,
        #[case] description: &str,
    ) {
        assert!(is_pallet_line(&line(unit, sku, description)));
    }

    #[test]
    fn plain_lines_are_not_pallets() {
        assert!(!is_pallet_line(&line(Some("bag"), Some("TS-40"), "Topsoil 40lb")));
        assert!(!is_pallet_line(&line(None, Some("PALM-1"), "Palm oil")));
    }

    #[test]
    fn pallets_become_bags_and_keep_the_total() {
        let normalized = normalize_line(&line(Some("pallet"), Some("TS-40"), "Topsoil"), 50).unwrap();
        assert_eq!(normalized.quantity, dec!(100));
        assert_eq!(normalized.unit, LineUnit::Bag);
        assert_eq!(normalized.pallet_quantity, Some(dec!(2)));
        assert_eq!(normalized.unit_price, dec!(10.0000));
        assert_eq!(normalized.total, dec!(1000.00));
    }

    #[test]
    fn per_bag_price_is_rounded_to_four_places() {
        let mut input = line(Some("pallet"), None, "Mulch");
        input.quantity = dec!(1);
        input.unit_price = Some(dec!(100));
        let normalized = normalize_line(&input, 3).unwrap();
        assert_eq!(normalized.unit_price, dec!(33.3333));
        assert_eq!(normalized.total, dec!(100.00));
    }

    #[test]
    fn stated_total_is_preserved_and_price_derived() {
        let input = LineInput {
            sku: None,
            description: "Gift card".into(),
            quantity: dec!(4),
            unit: None,
            unit_price: None,
            total: Some(dec!(100)),
        };
        let normalized = normalize_line(&input, 50).unwrap();
        assert_eq!(normalized.unit, LineUnit::Each);
        assert_eq!(normalized.unit_price, dec!(25));
        assert_eq!(normalized.total, dec!(100));
    }

    #[test]
    fn bag_unit_is_kept() {
        let normalized = normalize_line(&line(Some("Bags"), None, "Topsoil"), 50).unwrap();
        assert_eq!(normalized.unit, LineUnit::Bag);
        assert_eq!(normalized.quantity, dec!(2));
        assert_eq!(normalized.pallet_quantity, None);
        assert_eq!(normalized.total, dec!(1000));
    }

    #[test]
    fn business_unit_precedence() {
        assert_eq!(
            order_business_unit(OrderSource::Ecommerce, None, true),
            BusinessUnit::Pallet
        );
        assert_eq!(
            order_business_unit(OrderSource::Ecommerce, None, false),
            BusinessUnit::Retail
        );
        assert_eq!(
            order_business_unit(OrderSource::Accounting, Some(BusinessUnit::Distributor), true),
            BusinessUnit::Distributor
        );
    }

    #[test]
    fn subtotal_sums_line_totals() {
        let (lines, any_pallet) = normalize_lines(
            &[
                line(Some("pallet"), None, "Topsoil"),
                line(Some("each"), None, "Shovel"),
            ],
            50,
        )
        .unwrap();
        assert!(any_pallet);
        assert_eq!(subtotal(&lines).unwrap(), dec!(2000));
    }

    #[test]
    fn oversized_amounts_are_rejected_instead_of_overflowing() {
        let mut huge = line(Some("each"), None, "Mystery item");
        huge.quantity = Decimal::MAX;
        huge.unit_price = Some(dec!(2));
        assert!(matches!(
            normalize_line(&huge, 50),
            Err(ServiceError::ValidationError(_))
        ));

        let mut pallets = line(Some("pallet"), None, "Topsoil");
        pallets.quantity = Decimal::MAX;
        pallets.total = Some(dec!(1));
        assert!(matches!(
            normalize_line(&pallets, 50),
            Err(ServiceError::ValidationError(_))
        ));

        let big = NormalizedLine {
            sku: None,
            description: "Big".into(),
            quantity: dec!(1),
            unit: LineUnit::Each,
            pallet_quantity: None,
            unit_price: Decimal::MAX,
            total: Decimal::MAX,
        };
        assert!(subtotal(&[big.clone(), big]).is_err());
    }
}
