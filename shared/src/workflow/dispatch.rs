//! Dispatch workflow: open, complete, annul

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{apply_annulment, require_pin, PinVerifier, TankBook};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    dispatched_liters, AuditAction, AuditRecord, Dispatch, DispatchState, EntityType,
    MovementDraft, MovementType, Recipient, Tank, VoidedMovement,
};
use crate::policy::LedgerPolicy;
use crate::validation::{
    validate_liter_scale, validate_meter_start, validate_recipient, validate_reference,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDispatch {
    pub tank_id: Uuid,
    pub date: NaiveDate,
    pub recipient: Recipient,
    pub deliverer_id: Uuid,
    #[serde(skip_serializing)]
    pub deliverer_pin: String,
    pub meter_start: Decimal,
}

/// Start dispatch `id` from `tank` once the deliverer's PIN checks out
pub fn open_dispatch(
    id: Uuid,
    input: &OpenDispatch,
    tank: &Tank,
    pins: &dyn PinVerifier,
    now: DateTime<Utc>,
) -> LedgerResult<(Dispatch, AuditRecord)> {
    validate_meter_start(input.meter_start)?;
    validate_recipient(&input.recipient)?;
    tank.ensure_active()?;
    require_pin(pins, input.deliverer_id, Some(&input.deliverer_pin))?;

    let dispatch = Dispatch {
        id,
        business_id: tank.business_id,
        date: input.date,
        tank_id: tank.id,
        recipient: input.recipient.clone(),
        deliverer_id: input.deliverer_id,
        receiver_id: None,
        meter_start: input.meter_start,
        meter_end: None,
        liters: None,
        state: DispatchState::Open,
        evidence_ref: None,
        created_at: now,
        completed_by: None,
        completed_at: None,
        annulled_by: None,
        annulled_at: None,
        annul_reason: None,
    };

    let audit = AuditRecord::new(EntityType::Dispatch, dispatch.id, AuditAction::Opened)
        .with_detail(json!({
            "tank_id": dispatch.tank_id,
            "recipient": dispatch.recipient.kind().as_str(),
            "meter_start": dispatch.meter_start,
        }));
    Ok((dispatch, audit))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteDispatch {
    pub receiver_id: Option<Uuid>,
    #[serde(default, skip_serializing)]
    pub receiver_pin: Option<String>,
    pub meter_end: Decimal,
    pub evidence_ref: Option<String>,
}

/// A completion that passed every check that needs no stock access
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckedCompletion {
    liters: Decimal,
    receiver_id: Option<Uuid>,
}

impl CheckedCompletion {
    pub fn liters(&self) -> Decimal {
        self.liters
    }
}

/// Validate a completion request against an open dispatch
///
/// Runs before the tank is locked, so an inverted reading or a bad PIN never
/// reaches stock.
pub fn check_completion(
    dispatch: &Dispatch,
    input: &CompleteDispatch,
    pins: &dyn PinVerifier,
    policy: &LedgerPolicy,
) -> LedgerResult<CheckedCompletion> {
    dispatch.state.complete()?;
    validate_liter_scale("meter_end", input.meter_end)?;
    let liters = dispatched_liters(dispatch.meter_start, input.meter_end)?;

    if let Some(evidence) = &input.evidence_ref {
        validate_reference("evidence_ref", evidence)?;
    }

    let receiver_id = match &dispatch.recipient {
        Recipient::Internal { .. } => {
            let receiver_id = input.receiver_id.ok_or_else(|| {
                LedgerError::validation("receiver_id", "Internal dispatches need a receiver")
            })?;
            if receiver_id == dispatch.deliverer_id {
                return Err(LedgerError::validation(
                    "receiver_id",
                    "Receiver must be a different operator than the deliverer",
                ));
            }
            require_pin(pins, receiver_id, input.receiver_pin.as_deref())?;
            Some(receiver_id)
        }
        Recipient::External { .. } => {
            if policy.external_evidence_required && input.evidence_ref.is_none() {
                return Err(LedgerError::MissingEvidence);
            }
            None
        }
    };

    Ok(CheckedCompletion {
        liters,
        receiver_id,
    })
}

/// Drain the tank and flip the dispatch to COMPLETED
pub fn complete_dispatch(
    dispatch: &mut Dispatch,
    checked: CheckedCompletion,
    input: &CompleteDispatch,
    book: &mut TankBook,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> LedgerResult<AuditRecord> {
    let next = dispatch.state.complete()?;
    book.tank(dispatch.tank_id)?.ensure_active()?;

    book.post(MovementDraft::new(
        MovementType::Dispatch,
        dispatch.id,
        dispatch.tank_id,
        -checked.liters,
        actor_id,
    ))?;

    dispatch.meter_end = Some(input.meter_end);
    dispatch.liters = Some(checked.liters);
    dispatch.receiver_id = checked.receiver_id;
    dispatch.evidence_ref = input.evidence_ref.clone();
    dispatch.state = next;
    dispatch.completed_by = Some(actor_id);
    dispatch.completed_at = Some(now);

    Ok(
        AuditRecord::new(EntityType::Dispatch, dispatch.id, AuditAction::Completed).with_detail(
            json!({
                "tank_id": dispatch.tank_id,
                "liters": checked.liters,
                "receiver_id": dispatch.receiver_id,
                "evidence": dispatch.evidence_ref.is_some(),
            }),
        ),
    )
}

/// Annul a dispatch, putting the fuel back if it was completed
pub fn annul_dispatch(
    dispatch: &mut Dispatch,
    voided: &[VoidedMovement],
    book: &mut TankBook,
    actor_id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> LedgerResult<AuditRecord> {
    let previous = dispatch.state;
    let annulment = previous.annul(dispatch.id)?;
    let reversed = apply_annulment(book, EntityType::Dispatch, dispatch.id, annulment, voided)?;

    dispatch.mark_annulled(actor_id, reason.clone(), now);
    Ok(
        AuditRecord::new(EntityType::Dispatch, dispatch.id, AuditAction::Annulled).with_detail(
            json!({
                "previous_state": previous.as_str(),
                "restored_liters": -reversed,
                "reason": reason,
            }),
        ),
    )
}
