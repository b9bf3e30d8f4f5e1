//! Intake workflow: creation planning, receipt confirmation, annulment

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{apply_annulment, require_pin, PinVerifier, TankBook};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    discrepancy, format_intake_number, intake_totals, requires_reconciliation, AuditAction,
    AuditRecord, DriverInfo, EntityType, Intake, IntakeDetail, IntakeState, MovementDraft,
    MovementType, ReasonCode, Reconciliation, Tank, VoidedMovement,
};
use crate::policy::LedgerPolicy;
use crate::validation::{
    validate_driver_info, validate_liter_scale, validate_meter_pair, validate_positive_liters,
    validate_reference, validate_unit_price,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIntakeDetail {
    pub tank_id: Uuid,
    pub liters: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIntake {
    pub date: NaiveDate,
    pub supplier_ref: String,
    pub payment_type_ref: String,
    pub unit_price: Decimal,
    pub details: Vec<NewIntakeDetail>,
}

impl NewIntake {
    pub fn tank_ids(&self) -> Vec<Uuid> {
        super::lock_order(self.details.iter().map(|d| d.tank_id))
    }
}

/// Totals computed for a validated intake
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntakePlan {
    pub total_liters: Decimal,
    pub total_amount: Decimal,
}

/// Sequence numbers reserved for a new intake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeSequence {
    pub global: i64,
    pub daily: i32,
}

/// Validate a new intake against the current tank stock
///
/// Capacity is a soft check here: stock is read without locks and checked
/// again when the receipt is confirmed. Details for the same tank are summed
/// before the check.
pub fn plan_intake(input: &NewIntake, tanks: &BTreeMap<Uuid, Tank>) -> LedgerResult<IntakePlan> {
    validate_reference("supplier_ref", &input.supplier_ref)?;
    validate_reference("payment_type_ref", &input.payment_type_ref)?;
    validate_unit_price(input.unit_price)?;

    if input.details.is_empty() {
        return Err(LedgerError::validation(
            "details",
            "At least one detail is required",
        ));
    }

    let mut per_tank: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    for detail in &input.details {
        validate_positive_liters("details.liters", detail.liters)?;
        *per_tank.entry(detail.tank_id).or_insert(Decimal::ZERO) += detail.liters;
    }

    for (tank_id, liters) in &per_tank {
        let tank = tanks
            .get(tank_id)
            .ok_or(LedgerError::UnknownTank { tank_id: *tank_id })?;
        tank.ensure_active()?;
        tank.reserve_capacity(*liters)?;
    }

    let liters: Vec<Decimal> = input.details.iter().map(|d| d.liters).collect();
    let (total_liters, total_amount) = intake_totals(&liters, input.unit_price);
    Ok(IntakePlan {
        total_liters,
        total_amount,
    })
}

/// Materialize a planned intake as a PENDING record
pub fn build_intake(
    input: NewIntake,
    plan: IntakePlan,
    business_id: Uuid,
    sequence: IntakeSequence,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> (Intake, AuditRecord) {
    let id = Uuid::new_v4();
    let details = input
        .details
        .into_iter()
        .map(|d| IntakeDetail {
            id: Uuid::new_v4(),
            tank_id: d.tank_id,
            liters: d.liters,
            meter_start: None,
            meter_end: None,
            received_liters: None,
            posted_liters: None,
        })
        .collect();

    let intake = Intake {
        id,
        business_id,
        date: input.date,
        supplier_ref: input.supplier_ref.trim().to_string(),
        payment_type_ref: input.payment_type_ref.trim().to_string(),
        unit_price: input.unit_price,
        total_liters: plan.total_liters,
        total_amount: plan.total_amount,
        state: IntakeState::Pending,
        sequence_global: sequence.global,
        sequence_daily: sequence.daily,
        number: format_intake_number(input.date, sequence.daily),
        driver: None,
        details,
        created_by: actor_id,
        created_at: now,
        confirmed_by: None,
        confirmed_at: None,
        annulled_by: None,
        annulled_at: None,
        annul_reason: None,
    };

    let audit = AuditRecord::new(EntityType::Intake, id, AuditAction::Created).with_detail(json!({
        "number": intake.number,
        "total_liters": intake.total_liters,
        "details": intake.details.len(),
    }));
    (intake, audit)
}

/// Meter reading for one detail, with an optional reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailReading {
    pub detail_id: Uuid,
    pub meter_start: Decimal,
    pub meter_end: Decimal,
    #[serde(default)]
    pub reconciliation: Option<Reconciliation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptConfirmation {
    #[serde(default)]
    pub driver: Option<DriverInfo>,
    pub readings: Vec<DetailReading>,
}

/// A reconciled detail ready to post
#[derive(Debug, Clone)]
struct Adjustment {
    liters: Decimal,
    reason: ReasonCode,
    note: Option<String>,
    authorizer_id: Uuid,
    requested: Decimal,
}

#[derive(Debug, Clone)]
struct DetailPosting {
    index: usize,
    tank_id: Uuid,
    declared: Decimal,
    meter_start: Decimal,
    meter_end: Decimal,
    received: Decimal,
    adjustment: Option<Adjustment>,
}

impl DetailPosting {
    fn posted(&self) -> Decimal {
        self.declared + self.adjustment.as_ref().map_or(Decimal::ZERO, |a| a.liters)
    }
}

/// Confirm receipt of a PENDING intake
///
/// Every reading is validated (and every reconciliation authorized) before
/// the first liter is posted. On success the intake is FINALIZED, its details
/// carry the readings, and the book holds the INTAKE and ADJUSTMENT postings.
/// Returns the audit records to write: `confirmed`, then one `adjusted` per
/// reconciled detail.
#[allow(clippy::too_many_arguments)]
pub fn confirm_intake(
    intake: &mut Intake,
    confirmation: &ReceiptConfirmation,
    book: &mut TankBook,
    pins: &dyn PinVerifier,
    policy: &LedgerPolicy,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> LedgerResult<Vec<AuditRecord>> {
    let next = intake.state.confirm()?;

    if let Some(driver) = &confirmation.driver {
        validate_driver_info(driver)?;
    }

    let mut readings: HashMap<Uuid, &DetailReading> = HashMap::new();
    for reading in &confirmation.readings {
        intake.detail(reading.detail_id)?;
        if readings.insert(reading.detail_id, reading).is_some() {
            return Err(LedgerError::validation(
                "readings",
                format!("Duplicate reading for detail {}", reading.detail_id),
            ));
        }
    }

    let mut plan = Vec::with_capacity(intake.details.len());
    for (index, detail) in intake.details.iter().enumerate() {
        let reading = readings.get(&detail.id).ok_or_else(|| {
            LedgerError::validation(
                "readings",
                format!("Missing reading for detail {}", detail.id),
            )
        })?;
        book.tank(detail.tank_id)?.ensure_active()?;

        let received = validate_meter_pair(Some(detail.id), reading.meter_start, reading.meter_end)?;
        let adjustment = if requires_reconciliation(
            detail.liters,
            received,
            policy.reconciliation_threshold_liters,
        ) {
            Some(authorize_reconciliation(
                detail, received, reading, pins, actor_id,
            )?)
        } else {
            None
        };

        plan.push(DetailPosting {
            index,
            tank_id: detail.tank_id,
            declared: detail.liters,
            meter_start: reading.meter_start,
            meter_end: reading.meter_end,
            received,
            adjustment,
        });
    }

    // Postings land in a staged copy so a failing detail leaves the book untouched
    let mut staged = book.clone();
    let mut audit = vec![];
    for posting in &plan {
        // Capacity is checked against the reconciled quantity, not the declared one
        let mut drafts = vec![MovementDraft::new(
            MovementType::Intake,
            intake.id,
            posting.tank_id,
            posting.declared,
            actor_id,
        )];
        if let Some(adjustment) = &posting.adjustment {
            if !adjustment.liters.is_zero() {
                drafts.push(
                    MovementDraft::new(
                        MovementType::Adjustment,
                        intake.id,
                        posting.tank_id,
                        adjustment.liters,
                        actor_id,
                    )
                    .with_reason(adjustment.reason, adjustment.note.clone()),
                );
            }
        }
        staged.post_net(drafts)?;

        if let Some(adjustment) = &posting.adjustment {
            let detail_id = intake.details[posting.index].id;
            audit.push(
                AuditRecord::new(EntityType::Intake, intake.id, AuditAction::Adjusted).with_detail(
                    json!({
                        "detail_id": detail_id,
                        "tank_id": posting.tank_id,
                        "declared": posting.declared,
                        "received": posting.received,
                        "adjustment_liters": adjustment.requested,
                        "posted": posting.posted(),
                        "reason_code": adjustment.reason.as_str(),
                        "authorizer_id": adjustment.authorizer_id,
                    }),
                ),
            );
        }
    }

    *book = staged;

    for posting in &plan {
        let detail = &mut intake.details[posting.index];
        detail.meter_start = Some(posting.meter_start);
        detail.meter_end = Some(posting.meter_end);
        detail.received_liters = Some(posting.received);
        detail.posted_liters = Some(posting.posted());
    }
    if confirmation.driver.is_some() {
        intake.driver = confirmation.driver.clone();
    }
    intake.state = next;
    intake.confirmed_by = Some(actor_id);
    intake.confirmed_at = Some(now);

    let confirmed = AuditRecord::new(EntityType::Intake, intake.id, AuditAction::Confirmed)
        .with_detail(json!({
            "posted_liters": intake.posted_total(),
            "reconciled_details": audit.len(),
        }));
    audit.insert(0, confirmed);
    Ok(audit)
}

fn authorize_reconciliation(
    detail: &IntakeDetail,
    received: Decimal,
    reading: &DetailReading,
    pins: &dyn PinVerifier,
    actor_id: Uuid,
) -> LedgerResult<Adjustment> {
    let reconciliation =
        reading
            .reconciliation
            .as_ref()
            .ok_or(LedgerError::ReconciliationRequired {
                detail_id: detail.id,
                declared: detail.liters,
                received,
                discrepancy: discrepancy(detail.liters, received),
            })?;

    let reason = reconciliation
        .reason_code
        .ok_or(LedgerError::MissingReason {
            detail_id: detail.id,
        })?;
    let note = reconciliation
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    if reason.requires_note() && note.is_none() {
        return Err(LedgerError::validation(
            "reconciliation.note",
            "A note is required when the reason is other",
        ));
    }

    validate_liter_scale(
        "reconciliation.adjustment_liters",
        reconciliation.adjustment_liters,
    )?;
    let final_liters = received + reconciliation.adjustment_liters;
    if final_liters <= Decimal::ZERO {
        return Err(LedgerError::validation(
            "reconciliation.adjustment_liters",
            "Reconciled quantity must be positive",
        ));
    }

    let authorizer_id = reconciliation.authorizer_id.unwrap_or(actor_id);
    require_pin(pins, authorizer_id, reconciliation.pin.as_deref())?;

    Ok(Adjustment {
        liters: final_liters - detail.liters,
        reason,
        note,
        authorizer_id,
        requested: reconciliation.adjustment_liters,
    })
}

/// Annul an intake, reversing its stock if it was finalized
///
/// `voided` are the ledger rows of this intake already flipped to annulled.
pub fn annul_intake(
    intake: &mut Intake,
    voided: &[VoidedMovement],
    book: &mut TankBook,
    actor_id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> LedgerResult<AuditRecord> {
    let previous = intake.state;
    let annulment = previous.annul(intake.id)?;
    let reversed = apply_annulment(book, EntityType::Intake, intake.id, annulment, voided)?;

    intake.mark_annulled(actor_id, reason.clone(), now);
    Ok(
        AuditRecord::new(EntityType::Intake, intake.id, AuditAction::Annulled).with_detail(json!({
            "previous_state": previous.as_str(),
            "reversed_liters": reversed,
            "reason": reason,
        })),
    )
}
