//! Ledger workflow tests
//!
//! Runs the intake and dispatch workflows end to end against the in-memory
//! harness:
//! - Stock bounds hold after every operation
//! - Replaying active movements reproduces the stored stock
//! - Annulment is idempotent

mod common;

use common::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    AuditAction, CompleteDispatch, DispatchState, IntakeState, LedgerError, MovementType,
    ReasonCode, Reconciliation,
};

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Receive 100 L, then annul: stock and ledger return to the start
    #[test]
    fn test_intake_round_trip() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("5000", "0");

        let intake = ledger.receive(tank, "100").unwrap();
        assert_eq!(ledger.stock(tank), dec("100"));
        assert_eq!(ledger.movements.len(), 1);
        assert_eq!(ledger.movements[0].stock_before, dec("0"));
        assert_eq!(ledger.movements[0].stock_after, dec("100"));

        ledger.annul_intake(intake).unwrap();
        assert_eq!(ledger.stock(tank), dec("0"));
        assert_eq!(ledger.intake_state(intake), IntakeState::Annulled);
        assert!(ledger.movements.iter().all(|m| !m.is_active()));
        assert!(ledger.replay(tank).consistent);
    }

    /// Annulling an intake whose fuel was already dispatched is blocked
    #[test]
    fn test_reversal_blocked_by_later_dispatch() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("5000", "0");

        let intake = ledger.receive(tank, "100").unwrap();
        ledger.draw(tank, "80").unwrap();
        assert_eq!(ledger.stock(tank), dec("20"));

        let err = ledger.annul_intake(intake).unwrap_err();
        assert!(matches!(err, LedgerError::NegativeStockOnReversal { .. }));
        assert_eq!(ledger.stock(tank), dec("20"));
        assert_eq!(ledger.intake_state(intake), IntakeState::Finalized);
        assert!(ledger.movements.iter().all(|m| m.is_active()));
    }

    /// 480 of 500 in the tank at confirmation: 50 more does not fit
    #[test]
    fn test_capacity_rejected_at_confirmation() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("500", "400");

        let first = ledger.create_intake(&[(tank, "50")]).unwrap();
        ledger.receive(tank, "80").unwrap();
        assert_eq!(ledger.stock(tank), dec("480"));

        let confirmation = ledger.readings(first, &[("1000", "1050")]);
        let err = ledger.confirm_intake(first, &confirmation).unwrap_err();
        assert_eq!(
            err,
            LedgerError::CapacityExceeded {
                tank_id: tank,
                requested: dec("50"),
                available: dec("20"),
            }
        );
        assert_eq!(ledger.stock(tank), dec("480"));
        assert_eq!(ledger.intake_state(first), IntakeState::Pending);
    }

    #[test]
    fn test_capacity_soft_check_at_creation() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("500", "480");
        let err = ledger.create_intake(&[(tank, "50")]).unwrap_err();
        assert!(matches!(err, LedgerError::CapacityExceeded { .. }));
        assert!(ledger.intakes.is_empty());
    }

    /// Start 100, end 150 is rejected before the tank is touched
    #[test]
    fn test_dispatch_inverted_reading() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("5000", "300");
        let deliverer = ledger.add_operator("1111");
        let receiver = ledger.add_operator("2222");
        let dispatch = ledger.open_dispatch(tank, deliverer, "1111", "100").unwrap();

        let input = CompleteDispatch {
            receiver_id: Some(receiver),
            receiver_pin: Some("2222".to_string()),
            meter_end: dec("150"),
            evidence_ref: None,
        };
        let err = ledger.complete_dispatch(dispatch, &input).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidReading { .. }));
        assert_eq!(ledger.stock(tank), dec("300"));
        assert_eq!(ledger.dispatch_state(dispatch), DispatchState::Open);
        assert!(ledger.movements.is_empty());
    }

    #[test]
    fn test_dispatch_cannot_drain_below_zero() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("5000", "30");
        let err = ledger.draw(tank, "31").unwrap_err();
        assert!(matches!(err, LedgerError::NegativeStock { .. }));
        assert_eq!(ledger.stock(tank), dec("30"));
    }

    /// Declared 100, measured 101.2: needs a reason and a PIN
    #[test]
    fn test_reconciliation_trigger() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("5000", "0");
        let intake = ledger.create_intake(&[(tank, "100")]).unwrap();

        let mut confirmation = ledger.readings(intake, &[("1000", "1101.2")]);
        let err = ledger.confirm_intake(intake, &confirmation).unwrap_err();
        assert_eq!(
            err,
            LedgerError::ReconciliationRequired {
                detail_id: confirmation.readings[0].detail_id,
                declared: dec("100"),
                received: dec("101.2"),
                discrepancy: dec("1.2"),
            }
        );

        confirmation.readings[0].reconciliation = Some(Reconciliation {
            pin: Some("1234".to_string()),
            ..Default::default()
        });
        let err = ledger.confirm_intake(intake, &confirmation).unwrap_err();
        assert!(matches!(err, LedgerError::MissingReason { .. }));

        confirmation.readings[0].reconciliation = Some(Reconciliation {
            reason_code: Some(ReasonCode::MeterError),
            pin: Some("9999".to_string()),
            ..Default::default()
        });
        let err = ledger.confirm_intake(intake, &confirmation).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPin { .. }));

        assert_eq!(ledger.intake_state(intake), IntakeState::Pending);
        assert_eq!(ledger.stock(tank), dec("0"));
        assert!(ledger.movements.is_empty());

        confirmation.readings[0].reconciliation = Some(Reconciliation {
            reason_code: Some(ReasonCode::MeterError),
            pin: Some("1234".to_string()),
            ..Default::default()
        });
        ledger.confirm_intake(intake, &confirmation).unwrap();
        assert_eq!(ledger.stock(tank), dec("101.2"));

        let adjustment = ledger
            .movements
            .iter()
            .find(|m| m.movement_type == MovementType::Adjustment)
            .unwrap();
        assert_eq!(adjustment.liters, dec("1.2"));
        assert_eq!(adjustment.reason_code, Some(ReasonCode::MeterError));
    }

    #[test]
    fn test_reconciliation_with_supervisor_adjustment() {
        let mut ledger = MemoryLedger::new();
        let supervisor = ledger.add_operator("4321");
        let tank = ledger.add_tank("5000", "0");
        let intake = ledger.create_intake(&[(tank, "100")]).unwrap();

        let mut confirmation = ledger.readings(intake, &[("1000", "1097")]);
        confirmation.readings[0].reconciliation = Some(Reconciliation {
            adjustment_liters: dec("1"),
            reason_code: Some(ReasonCode::Evaporation),
            note: Some("Hot afternoon delivery".to_string()),
            authorizer_id: Some(supervisor),
            pin: Some("4321".to_string()),
        });
        ledger.confirm_intake(intake, &confirmation).unwrap();

        assert_eq!(ledger.stock(tank), dec("98"));
        let detail = &ledger.intakes[&intake].details[0];
        assert_eq!(detail.received_liters, Some(dec("97")));
        assert_eq!(detail.posted_liters, Some(dec("98")));
        assert!(ledger.replay(tank).consistent);
    }

    /// A second annulment reports AlreadyVoided and changes nothing
    #[test]
    fn test_annulment_is_idempotent() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("5000", "200");
        let dispatch = ledger.draw(tank, "50").unwrap();

        ledger.annul_dispatch(dispatch).unwrap();
        assert_eq!(ledger.stock(tank), dec("200"));

        let audit_before = ledger.audit.len();
        let err = ledger.annul_dispatch(dispatch).unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyVoided { .. }));
        assert_eq!(ledger.stock(tank), dec("200"));
        assert_eq!(ledger.audit.len(), audit_before);
    }

    #[test]
    fn test_annul_open_dispatch_leaves_stock() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("5000", "200");
        let deliverer = ledger.add_operator("1111");
        let dispatch = ledger.open_dispatch(tank, deliverer, "1111", "900").unwrap();

        ledger.annul_dispatch(dispatch).unwrap();
        assert_eq!(ledger.dispatch_state(dispatch), DispatchState::Annulled);
        assert_eq!(ledger.stock(tank), dec("200"));
        assert!(ledger.movements.is_empty());
    }

    /// Putting dispatched fuel back still has to fit in the tank
    #[test]
    fn test_dispatch_annulment_rechecks_capacity() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("500", "500");
        let dispatch = ledger.draw(tank, "100").unwrap();
        ledger.receive(tank, "100").unwrap();

        let err = ledger.annul_dispatch(dispatch).unwrap_err();
        assert!(matches!(err, LedgerError::CapacityExceeded { .. }));
        assert_eq!(ledger.dispatch_state(dispatch), DispatchState::Completed);
    }

    #[test]
    fn test_multi_tank_intake() {
        let mut ledger = MemoryLedger::new();
        let a = ledger.add_tank("1000", "0");
        let b = ledger.add_tank("1000", "0");
        let intake = ledger.create_intake(&[(a, "300"), (b, "200")]).unwrap();
        assert_eq!(ledger.intakes[&intake].total_liters, dec("500"));
        assert_eq!(ledger.intakes[&intake].total_amount, dec("550.00"));

        let confirmation = ledger.readings(intake, &[("0", "300"), ("50", "250")]);
        ledger.confirm_intake(intake, &confirmation).unwrap();
        assert_eq!(ledger.stock(a), dec("300"));
        assert_eq!(ledger.stock(b), dec("200"));

        ledger.annul_intake(intake).unwrap();
        assert_eq!(ledger.stock(a), dec("0"));
        assert_eq!(ledger.stock(b), dec("0"));
    }

    /// Second tank overflows: nothing is posted on either tank
    #[test]
    fn test_multi_tank_intake_is_all_or_nothing() {
        let mut ledger = MemoryLedger::new();
        let a = ledger.add_tank("1000", "0");
        let b = ledger.add_tank("500", "0");
        let intake = ledger.create_intake(&[(a, "300"), (b, "200")]).unwrap();
        ledger.receive(b, "400").unwrap();
        let movements_before = ledger.movements.len();

        let confirmation = ledger.readings(intake, &[("0", "300"), ("50", "250")]);
        let err = ledger.confirm_intake(intake, &confirmation).unwrap_err();
        assert!(matches!(err, LedgerError::CapacityExceeded { tank_id, .. } if tank_id == b));

        assert_eq!(ledger.stock(a), dec("0"));
        assert_eq!(ledger.stock(b), dec("400"));
        assert_eq!(ledger.movements.len(), movements_before);
        assert!(ledger.movements.iter().all(|m| m.tank_id != a));
        assert_eq!(ledger.intake_state(intake), IntakeState::Pending);
    }

    /// Short delivery into a nearly full tank: the reconciled 30 L fits
    #[test]
    fn test_reconciled_quantity_checked_against_capacity() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("500", "0");
        let short = ledger.create_intake(&[(tank, "50")]).unwrap();
        ledger.receive(tank, "460").unwrap();

        let mut confirmation = ledger.readings(short, &[("1000", "1030")]);
        confirmation.readings[0].reconciliation = Some(Reconciliation {
            reason_code: Some(ReasonCode::SupplierDiscrepancy),
            pin: Some("1234".to_string()),
            ..Default::default()
        });
        ledger.confirm_intake(short, &confirmation).unwrap();

        assert_eq!(ledger.stock(tank), dec("490"));
        assert_eq!(ledger.intakes[&short].details[0].posted_liters, Some(dec("30")));
        let rows: Vec<_> = ledger
            .movements
            .iter()
            .filter(|m| m.origin_ref == Some(short))
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].movement_type, MovementType::Intake);
        assert_eq!(rows[0].liters, dec("50"));
        assert_eq!(rows[1].movement_type, MovementType::Adjustment);
        assert_eq!(rows[1].liters, dec("-20"));
        assert_eq!(rows[0].stock_after, rows[1].stock_before);
        assert_eq!(rows[1].stock_after, dec("490"));
        assert!(ledger.replay(tank).consistent);
    }

    #[test]
    fn test_audit_trail_follows_transitions() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("5000", "0");
        let intake = ledger.receive(tank, "100").unwrap();
        ledger.annul_intake(intake).unwrap();

        let actions: Vec<AuditAction> = ledger
            .audit
            .iter()
            .filter(|a| a.entity_id == intake)
            .map(|a| a.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Created,
                AuditAction::Confirmed,
                AuditAction::Annulled
            ]
        );
    }

    #[test]
    fn test_confirm_twice_is_invalid_state() {
        let mut ledger = MemoryLedger::new();
        let tank = ledger.add_tank("5000", "0");
        let intake = ledger.receive(tank, "100").unwrap();
        let confirmation = ledger.readings(intake, &[("1000", "1100")]);

        let err = ledger.confirm_intake(intake, &confirmation).unwrap_err();
        assert_eq!(err.current_state(), Some("finalized"));
        assert_eq!(ledger.stock(tank), dec("100"));
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Receive(i64),
        Draw(i64),
        AnnulIntake(usize),
        AnnulDispatch(usize),
    }

    /// Whole liters with one decimal place, 0.1 to 400.0
    fn liters_strategy() -> impl Strategy<Value = i64> {
        1i64..=4000i64
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            liters_strategy().prop_map(Op::Receive),
            liters_strategy().prop_map(Op::Draw),
            any::<usize>().prop_map(Op::AnnulIntake),
            any::<usize>().prop_map(Op::AnnulDispatch),
        ]
    }

    fn tenths(n: i64) -> String {
        Decimal::new(n, 1).to_string()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Stock stays within [0, capacity] and matches the ledger replay
        /// whatever sequence of operations is attempted
        #[test]
        fn prop_stock_bounds_and_replay(ops in prop::collection::vec(op_strategy(), 1..25)) {
            let mut ledger = MemoryLedger::new();
            let tank = ledger.add_tank("1000", "250");
            let mut intakes = Vec::new();
            let mut dispatches = Vec::new();

            for op in ops {
                match op {
                    Op::Receive(n) => {
                        if let Ok(id) = ledger.receive(tank, &tenths(n)) {
                            intakes.push(id);
                        }
                    }
                    Op::Draw(n) => {
                        if let Ok(id) = ledger.draw(tank, &tenths(n)) {
                            dispatches.push(id);
                        }
                    }
                    Op::AnnulIntake(i) if !intakes.is_empty() => {
                        let _ = ledger.annul_intake(intakes[i % intakes.len()]);
                    }
                    Op::AnnulDispatch(i) if !dispatches.is_empty() => {
                        let _ = ledger.annul_dispatch(dispatches[i % dispatches.len()]);
                    }
                    _ => {}
                }

                let stored = ledger.tanks[&tank].clone();
                prop_assert!(stored.is_within_bounds());
                prop_assert!(ledger.replay(tank).consistent);
            }
        }

        /// Annulling twice leaves stock exactly where the first annulment put it
        #[test]
        fn prop_annulment_idempotent(
            received in liters_strategy(),
            drawn in liters_strategy(),
        ) {
            let mut ledger = MemoryLedger::new();
            let tank = ledger.add_tank("1000", "500");
            let intake = ledger.receive(tank, &tenths(received)).unwrap();
            let dispatch = ledger.draw(tank, &tenths(drawn)).unwrap();

            ledger.annul_dispatch(dispatch).unwrap();
            let after_first = ledger.stock(tank);
            prop_assert!(
                matches!(ledger.annul_dispatch(dispatch), Err(LedgerError::AlreadyVoided { .. })),
                "expected AlreadyVoided on repeated annulment"
            );
            prop_assert_eq!(ledger.stock(tank), after_first);

            ledger.annul_intake(intake).unwrap();
            let after_intake = ledger.stock(tank);
            prop_assert_eq!(after_intake, dec("500"));
            prop_assert!(
                matches!(ledger.annul_intake(intake), Err(LedgerError::AlreadyVoided { .. })),
                "expected AlreadyVoided on repeated annulment"
            );
            prop_assert_eq!(ledger.stock(tank), after_intake);
        }
    }
}
