//! Validation utilities for the Fuel Inventory Ledger
//!
//! Input rules checked before any transaction starts. Each failure maps to a
//! `LedgerError` naming the offending field.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{DriverInfo, Recipient};

/// Longest free-text reference accepted (supplier, job, machine, evidence)
pub const MAX_REFERENCE_LEN: usize = 120;

/// Decimal places stored for liters and meter readings
pub const MAX_LITER_SCALE: u32 = 3;

// ============================================================================
// Quantity Validations
// ============================================================================

/// Validate a quantity or reading fits the stored precision
pub fn validate_liter_scale(field: &str, value: Decimal) -> LedgerResult<()> {
    if value.normalize().scale() > MAX_LITER_SCALE {
        return Err(LedgerError::validation(
            field,
            format!("At most {} decimal places are allowed", MAX_LITER_SCALE),
        ));
    }
    Ok(())
}

/// Validate a quantity is strictly positive
pub fn validate_positive_liters(field: &str, liters: Decimal) -> LedgerResult<()> {
    if liters <= Decimal::ZERO {
        return Err(LedgerError::validation(field, "Liters must be positive"));
    }
    validate_liter_scale(field, liters)
}

/// Validate a unit price is not negative
pub fn validate_unit_price(unit_price: Decimal) -> LedgerResult<()> {
    if unit_price < Decimal::ZERO {
        return Err(LedgerError::validation(
            "unit_price",
            "Unit price cannot be negative",
        ));
    }
    Ok(())
}

/// Validate an intake meter pair and return the received liters
pub fn validate_meter_pair(
    detail_id: Option<Uuid>,
    meter_start: Decimal,
    meter_end: Decimal,
) -> LedgerResult<Decimal> {
    validate_liter_scale("meter_start", meter_start)?;
    validate_liter_scale("meter_end", meter_end)?;
    if meter_start < Decimal::ZERO || meter_end < meter_start {
        return Err(LedgerError::InvalidReading {
            detail_id,
            meter_start,
            meter_end,
        });
    }
    Ok(meter_end - meter_start)
}

/// Validate the opening gauge reading of a dispatch
pub fn validate_meter_start(meter_start: Decimal) -> LedgerResult<()> {
    if meter_start <= Decimal::ZERO {
        return Err(LedgerError::validation(
            "meter_start",
            "Start reading must be greater than zero",
        ));
    }
    validate_liter_scale("meter_start", meter_start)
}

// ============================================================================
// Reference Validations
// ============================================================================

/// Validate a required free-text reference
pub fn validate_reference(field: &str, value: &str) -> LedgerResult<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation(field, "Value is required"));
    }
    if trimmed.chars().count() > MAX_REFERENCE_LEN {
        return Err(LedgerError::validation(field, "Value is too long"));
    }
    Ok(())
}

/// Validate a vehicle plate: 3-12 letters, digits, dashes or spaces
pub fn validate_plate(plate: &str) -> LedgerResult<()> {
    let trimmed = plate.trim();
    let len = trimmed.chars().count();
    if !(3..=12).contains(&len) {
        return Err(LedgerError::validation(
            "plate",
            "Plate must be 3 to 12 characters",
        ));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ' ')
    {
        return Err(LedgerError::validation(
            "plate",
            "Plate may only contain letters, digits, dashes and spaces",
        ));
    }
    Ok(())
}

/// Validate PIN shape (4-8 digits) before it reaches the verifier
pub fn validate_pin_format(pin: &str) -> LedgerResult<()> {
    if !(4..=8).contains(&pin.len()) || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(LedgerError::validation("pin", "PIN must be 4 to 8 digits"));
    }
    Ok(())
}

/// Validate the recipient fields required for its kind
pub fn validate_recipient(recipient: &Recipient) -> LedgerResult<()> {
    match recipient {
        Recipient::Internal {
            machine_ref,
            job_ref,
        } => {
            validate_reference("machine_ref", machine_ref)?;
            validate_reference("job_ref", job_ref)
        }
        Recipient::External {
            driver_name,
            driver_document,
            plate,
        } => {
            validate_reference("driver_name", driver_name)?;
            validate_reference("driver_document", driver_document)?;
            validate_plate(plate)
        }
    }
}

/// Validate driver details captured on intake receipt
pub fn validate_driver_info(driver: &DriverInfo) -> LedgerResult<()> {
    validate_reference("driver.name", &driver.name)?;
    validate_reference("driver.document", &driver.document)?;
    validate_plate(&driver.plate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    // ========================================================================
    // Quantity Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_positive_liters() {
        assert!(validate_positive_liters("liters", dec("0.1")).is_ok());
        assert!(validate_positive_liters("liters", Decimal::ZERO).is_err());
        assert!(validate_positive_liters("liters", dec("-5")).is_err());
    }

    #[test]
    fn test_liters_limited_to_three_decimals() {
        assert!(validate_positive_liters("liters", dec("0.001")).is_ok());
        assert!(validate_positive_liters("liters", dec("12.5000")).is_ok());
        assert_eq!(
            validate_positive_liters("liters", dec("0.0001")),
            Err(LedgerError::validation(
                "liters",
                "At most 3 decimal places are allowed"
            ))
        );
        assert!(validate_meter_pair(None, dec("1000"), dec("1100.0005")).is_err());
        assert!(validate_meter_start(dec("150.1234")).is_err());
        assert!(validate_liter_scale("adjustment_liters", dec("-0.25")).is_ok());
    }

    #[test]
    fn test_validate_meter_pair_returns_received() {
        assert_eq!(
            validate_meter_pair(None, dec("1000"), dec("1100")),
            Ok(dec("100"))
        );
    }

    #[test]
    fn test_validate_meter_pair_inverted() {
        let detail = Uuid::new_v4();
        let err = validate_meter_pair(Some(detail), dec("1100"), dec("1000")).unwrap_err();
        assert_eq!(err.detail_id(), Some(detail));
    }

    #[test]
    fn test_validate_meter_start_must_be_positive() {
        assert!(validate_meter_start(dec("0")).is_err());
        assert!(validate_meter_start(dec("12.5")).is_ok());
    }

    // ========================================================================
    // Reference Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_plate() {
        assert!(validate_plate("ABC-123").is_ok());
        assert!(validate_plate("AB").is_err());
        assert!(validate_plate("ABC_123").is_err());
    }

    #[test]
    fn test_validate_pin_format() {
        assert!(validate_pin_format("1234").is_ok());
        assert!(validate_pin_format("12a4").is_err());
        assert!(validate_pin_format("123").is_err());
    }

    #[test]
    fn test_internal_recipient_requires_job() {
        let recipient = Recipient::Internal {
            machine_ref: "EXC-07".to_string(),
            job_ref: "  ".to_string(),
        };
        assert_eq!(
            validate_recipient(&recipient),
            Err(LedgerError::validation("job_ref", "Value is required"))
        );
    }

    #[test]
    fn test_external_recipient_requires_plate() {
        let recipient = Recipient::External {
            driver_name: "Luis Paredes".to_string(),
            driver_document: "44556677".to_string(),
            plate: "".to_string(),
        };
        assert!(validate_recipient(&recipient).is_err());
    }
}
