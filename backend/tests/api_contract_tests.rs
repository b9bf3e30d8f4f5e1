//! API contract tests
//!
//! Checks the JSON shapes the HTTP layer accepts and renders:
//! - Request bodies parse into the workflow inputs
//! - PINs never appear in serialized output
//! - Domain errors expose the codes and context the error body carries

use rust_decimal::Decimal;
use serde_json::json;
use shared::{
    CompleteDispatch, EntityType, LedgerError, OpenDispatch, ReasonCode, ReceiptConfirmation,
    Recipient,
};
use std::str::FromStr;
use uuid::Uuid;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[cfg(test)]
mod request_tests {
    use super::*;

    #[test]
    fn test_confirmation_with_reconciliation_parses() {
        let detail_id = Uuid::new_v4();
        let body = json!({
            "readings": [{
                "detail_id": detail_id,
                "meter_start": "1000",
                "meter_end": "1101.2",
                "reconciliation": {
                    "reason_code": "meter_error",
                    "pin": "4821"
                }
            }]
        });

        let confirmation: ReceiptConfirmation = serde_json::from_value(body).unwrap();
        assert!(confirmation.driver.is_none());
        let reading = &confirmation.readings[0];
        assert_eq!(reading.detail_id, detail_id);
        assert_eq!(reading.meter_end - reading.meter_start, dec("101.2"));

        let reconciliation = reading.reconciliation.as_ref().unwrap();
        assert_eq!(reconciliation.adjustment_liters, Decimal::ZERO);
        assert_eq!(reconciliation.reason_code, Some(ReasonCode::MeterError));
        assert_eq!(reconciliation.authorizer_id, None);
        assert_eq!(reconciliation.pin.as_deref(), Some("4821"));
    }

    #[test]
    fn test_reading_without_reconciliation_parses() {
        let body = json!({
            "driver": { "name": "Luis Paredes", "document": "44556677", "plate": "XYZ-987" },
            "readings": [{ "detail_id": Uuid::new_v4(), "meter_start": "0", "meter_end": "100" }]
        });

        let confirmation: ReceiptConfirmation = serde_json::from_value(body).unwrap();
        assert_eq!(confirmation.driver.unwrap().plate, "XYZ-987");
        assert!(confirmation.readings[0].reconciliation.is_none());
    }

    #[test]
    fn test_recipient_kinds_parse_by_tag() {
        let internal: Recipient =
            serde_json::from_value(json!({ "kind": "internal", "machine_ref": "EXC-04", "job_ref": "JOB-7" }))
                .unwrap();
        assert!(matches!(internal, Recipient::Internal { .. }));

        let missing_plate = serde_json::from_value::<Recipient>(
            json!({ "kind": "external", "driver_name": "Ana", "driver_document": "123" }),
        );
        assert!(missing_plate.is_err());
    }

    #[test]
    fn test_pins_are_not_serialized() {
        let open = OpenDispatch {
            tank_id: Uuid::new_v4(),
            date: chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            recipient: Recipient::Internal {
                machine_ref: "EXC-04".to_string(),
                job_ref: "JOB-7".to_string(),
            },
            deliverer_id: Uuid::new_v4(),
            deliverer_pin: "4821".to_string(),
            meter_start: dec("150"),
        };
        let value = serde_json::to_value(&open).unwrap();
        assert!(value.get("deliverer_pin").is_none());
        assert!(!value.to_string().contains("4821"));

        let complete = CompleteDispatch {
            receiver_id: Some(Uuid::new_v4()),
            receiver_pin: Some("9911".to_string()),
            meter_end: dec("100"),
            evidence_ref: None,
        };
        let value = serde_json::to_value(&complete).unwrap();
        assert!(value.get("receiver_pin").is_none());

        let parsed: CompleteDispatch = serde_json::from_value(json!({
            "receiver_id": Uuid::new_v4(),
            "receiver_pin": "9911",
            "meter_end": "100"
        }))
        .unwrap();
        assert_eq!(parsed.receiver_pin.as_deref(), Some("9911"));
    }
}

#[cfg(test)]
mod error_body_tests {
    use super::*;

    #[test]
    fn test_capacity_error_points_at_tank() {
        let tank_id = Uuid::new_v4();
        let err = LedgerError::CapacityExceeded {
            tank_id,
            requested: dec("50"),
            available: dec("20"),
        };
        assert_eq!(err.code(), "CAPACITY_EXCEEDED");
        assert_eq!(err.tank_id(), Some(tank_id));
        assert!(err.to_string().contains("room for 20 L"));
    }

    #[test]
    fn test_reconciliation_error_points_at_detail() {
        let detail_id = Uuid::new_v4();
        let err = LedgerError::ReconciliationRequired {
            detail_id,
            declared: dec("100"),
            received: dec("101.2"),
            discrepancy: dec("1.2"),
        };
        assert_eq!(err.code(), "RECONCILIATION_REQUIRED");
        assert_eq!(err.detail_id(), Some(detail_id));
        assert_eq!(err.tank_id(), None);
    }

    #[test]
    fn test_state_errors_report_current_state() {
        let err = LedgerError::InvalidState {
            entity: EntityType::Intake,
            current: "finalized".to_string(),
            attempted: "confirm",
        };
        assert_eq!(err.current_state(), Some("finalized"));
        assert_eq!(err.to_string(), "Intake is finalized, cannot confirm");
    }

    #[test]
    fn test_every_code_is_screaming_snake_case() {
        let id = Uuid::new_v4();
        let errors = [
            LedgerError::validation("liters", "must be positive"),
            LedgerError::InvalidPin { actor_id: id },
            LedgerError::MissingReason { detail_id: id },
            LedgerError::MissingEvidence,
            LedgerError::AlreadyVoided {
                entity: EntityType::Dispatch,
                id,
            },
            LedgerError::TankInactive { tank_id: id },
            LedgerError::UnknownTank { tank_id: id },
            LedgerError::UnknownDetail { detail_id: id },
        ];
        for err in errors {
            assert!(err
                .code()
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }
}
