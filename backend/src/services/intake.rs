//! Intake workflow service
//!
//! Runs the shared intake workflow inside PostgreSQL transactions: creation
//! with sequence assignment, receipt confirmation and annulment.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    annul_intake, build_intake, confirm_intake, plan_intake, DateRange, DriverInfo, EntityType,
    Intake, IntakeDetail, IntakeSequence, IntakeState, LedgerError, LedgerPolicy, NewIntake,
    PaginatedResponse, Pagination, PaginationMeta, ReceiptConfirmation,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::AnnulOutcome;
use crate::services::access::OperatorContext;
use crate::services::audit::AuditService;
use crate::services::ledger::LedgerService;
use crate::services::pin::CredentialSet;
use crate::services::tank::TankService;

/// Intake service for supplier deliveries
#[derive(Clone)]
pub struct IntakeService {
    db: PgPool,
    policy: LedgerPolicy,
}

/// Filter for listing intakes
#[derive(Debug, Clone, Default)]
pub struct IntakeFilter {
    pub state: Option<IntakeState>,
    pub range: Option<DateRange>,
}

#[derive(Debug, FromRow)]
struct IntakeRow {
    id: Uuid,
    business_id: Uuid,
    date: NaiveDate,
    supplier_ref: String,
    payment_type_ref: String,
    unit_price: Decimal,
    total_liters: Decimal,
    total_amount: Decimal,
    state: String,
    sequence_global: i64,
    sequence_daily: i32,
    number: String,
    driver_name: Option<String>,
    driver_document: Option<String>,
    driver_plate: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    confirmed_by: Option<Uuid>,
    confirmed_at: Option<DateTime<Utc>>,
    annulled_by: Option<Uuid>,
    annulled_at: Option<DateTime<Utc>>,
    annul_reason: Option<String>,
}

#[derive(Debug, FromRow)]
struct DetailRow {
    id: Uuid,
    intake_id: Uuid,
    tank_id: Uuid,
    liters: Decimal,
    meter_start: Option<Decimal>,
    meter_end: Option<Decimal>,
    received_liters: Option<Decimal>,
    posted_liters: Option<Decimal>,
}

impl DetailRow {
    fn into_detail(self) -> IntakeDetail {
        IntakeDetail {
            id: self.id,
            tank_id: self.tank_id,
            liters: self.liters,
            meter_start: self.meter_start,
            meter_end: self.meter_end,
            received_liters: self.received_liters,
            posted_liters: self.posted_liters,
        }
    }
}

impl IntakeRow {
    fn into_intake(self, details: Vec<IntakeDetail>) -> AppResult<Intake> {
        let driver = match (self.driver_name, self.driver_document, self.driver_plate) {
            (Some(name), Some(document), Some(plate)) => Some(DriverInfo {
                name,
                document,
                plate,
            }),
            _ => None,
        };

        Ok(Intake {
            id: self.id,
            business_id: self.business_id,
            date: self.date,
            supplier_ref: self.supplier_ref,
            payment_type_ref: self.payment_type_ref,
            unit_price: self.unit_price,
            total_liters: self.total_liters,
            total_amount: self.total_amount,
            state: IntakeState::from_str(&self.state)
                .ok_or_else(|| AppError::Internal(format!("Unknown intake state {}", self.state)))?,
            sequence_global: self.sequence_global,
            sequence_daily: self.sequence_daily,
            number: self.number,
            driver,
            details,
            created_by: self.created_by,
            created_at: self.created_at,
            confirmed_by: self.confirmed_by,
            confirmed_at: self.confirmed_at,
            annulled_by: self.annulled_by,
            annulled_at: self.annulled_at,
            annul_reason: self.annul_reason,
        })
    }
}

const INTAKE_COLUMNS: &str = "i.id, i.business_id, i.date, i.supplier_ref, i.payment_type_ref, \
     i.unit_price, i.total_liters, i.total_amount, i.state, i.sequence_global, i.sequence_daily, \
     i.number, i.driver_name, i.driver_document, i.driver_plate, i.created_by, i.created_at, \
     i.confirmed_by, i.confirmed_at, i.annulled_by, i.annulled_at, i.annul_reason";

/// Advisory lock key serializing sequence assignment per business
fn sequence_lock_key(business_id: Uuid) -> i64 {
    let (high, low) = business_id.as_u64_pair();
    (high ^ low) as i64
}

impl IntakeService {
    pub fn new(db: PgPool, policy: LedgerPolicy) -> Self {
        Self { db, policy }
    }

    /// Register a PENDING intake
    pub async fn create(&self, ctx: &OperatorContext, input: NewIntake) -> AppResult<Intake> {
        let tank_ids = input.tank_ids();
        let mut tx = self.db.begin().await?;

        ctx.ensure_tank_access(&mut tx, &tank_ids).await?;
        let tanks = TankService::snapshot(&mut tx, ctx.business_id, &tank_ids).await?;
        let plan = plan_intake(&input, &tanks)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(sequence_lock_key(ctx.business_id))
            .execute(&mut *tx)
            .await?;

        let global = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(sequence_global), 0) + 1 FROM intakes WHERE business_id = $1",
        )
        .bind(ctx.business_id)
        .fetch_one(&mut *tx)
        .await?;

        let daily = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT COALESCE(MAX(sequence_daily), 0) + 1
            FROM intakes
            WHERE business_id = $1 AND date = $2
            "#,
        )
        .bind(ctx.business_id)
        .bind(input.date)
        .fetch_one(&mut *tx)
        .await?;

        let (intake, audit) = build_intake(
            input,
            plan,
            ctx.business_id,
            IntakeSequence { global, daily },
            ctx.actor_id(),
            Utc::now(),
        );

        Self::insert(&mut tx, &intake).await?;
        AuditService::record_all(&mut tx, ctx.business_id, &ctx.actor, &[audit]).await?;
        tx.commit().await?;

        tracing::info!(
            intake_id = %intake.id,
            number = %intake.number,
            total_liters = %intake.total_liters,
            "Intake created"
        );
        Ok(intake)
    }

    /// Confirm receipt of a PENDING intake and post its liters
    pub async fn confirm(
        &self,
        ctx: &OperatorContext,
        intake_id: Uuid,
        confirmation: ReceiptConfirmation,
    ) -> AppResult<Intake> {
        let mut tx = self.db.begin().await?;
        let mut intake = Self::fetch(&mut tx, ctx.business_id, intake_id, true).await?;

        let tank_ids = intake.tank_ids();
        ctx.ensure_tank_access(&mut tx, &tank_ids).await?;
        let mut book = TankService::lock(&mut tx, ctx.business_id, &tank_ids).await?;

        let authorizers: Vec<Uuid> = confirmation
            .readings
            .iter()
            .filter_map(|r| r.reconciliation.as_ref())
            .map(|r| r.authorizer_id.unwrap_or(ctx.actor_id()))
            .collect();
        let pins = CredentialSet::load(&mut tx, ctx.business_id, &authorizers).await?;

        let now = Utc::now();
        let confirmed = confirm_intake(
            &mut intake,
            &confirmation,
            &mut book,
            &pins,
            &self.policy,
            ctx.actor_id(),
            now,
        );
        let audit = match confirmed {
            Ok(audit) => audit,
            Err(LedgerError::InvalidPin { actor_id }) => {
                tx.rollback().await?;
                AuditService::new(self.db.clone())
                    .record_pin_rejection(
                        ctx.business_id,
                        &ctx.actor,
                        EntityType::Intake,
                        intake_id,
                        actor_id,
                    )
                    .await?;
                return Err(LedgerError::InvalidPin { actor_id }.into());
            }
            Err(e) => return Err(e.into()),
        };

        let movements = LedgerService::commit_book(&mut tx, ctx.business_id, book, now).await?;
        Self::save(&mut tx, &intake).await?;
        AuditService::record_all(&mut tx, ctx.business_id, &ctx.actor, &audit).await?;
        tx.commit().await?;

        tracing::info!(
            intake_id = %intake.id,
            posted_liters = %intake.posted_total(),
            movements = movements.len(),
            "Intake confirmed"
        );
        Ok(intake)
    }

    /// Annul an intake, reversing its stock when it was finalized
    pub async fn annul(
        &self,
        ctx: &OperatorContext,
        intake_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<AnnulOutcome<Intake>> {
        let mut tx = self.db.begin().await?;
        let mut intake = Self::fetch(&mut tx, ctx.business_id, intake_id, true).await?;

        let tank_ids = intake.tank_ids();
        ctx.ensure_tank_access(&mut tx, &tank_ids).await?;

        if intake.state == IntakeState::Annulled {
            tracing::debug!(%intake_id, "Intake already annulled");
            return Ok(AnnulOutcome::unchanged(intake));
        }

        let mut book = TankService::lock(&mut tx, ctx.business_id, &tank_ids).await?;
        let voided = if intake.state == IntakeState::Finalized {
            LedgerService::void_origin(&mut tx, EntityType::Intake, intake_id).await?
        } else {
            Vec::new()
        };

        let now = Utc::now();
        let audit = annul_intake(&mut intake, &voided, &mut book, ctx.actor_id(), reason, now)
            .map_err(|e| {
                if let LedgerError::NegativeStockOnReversal {
                    tank_id,
                    requested,
                    available,
                } = &e
                {
                    tracing::warn!(
                        %intake_id,
                        %tank_id,
                        %requested,
                        %available,
                        "Intake reversal blocked"
                    );
                }
                e
            })?;

        LedgerService::commit_book(&mut tx, ctx.business_id, book, now).await?;
        Self::save(&mut tx, &intake).await?;
        AuditService::record_all(&mut tx, ctx.business_id, &ctx.actor, &[audit]).await?;
        tx.commit().await?;

        tracing::info!(
            %intake_id,
            reversed_movements = voided.len(),
            "Intake annulled"
        );
        Ok(AnnulOutcome::annulled(intake))
    }

    /// Get one intake with its details
    pub async fn get(&self, ctx: &OperatorContext, intake_id: Uuid) -> AppResult<Intake> {
        let mut conn = self.db.acquire().await?;
        let intake = Self::fetch(&mut conn, ctx.business_id, intake_id, false).await?;
        ctx.ensure_tank_access(&mut conn, &intake.tank_ids()).await?;
        Ok(intake)
    }

    /// List intakes, newest first
    ///
    /// Operators without full tank scope only see intakes whose every tank is
    /// assigned to them.
    pub async fn list(
        &self,
        ctx: &OperatorContext,
        filter: IntakeFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Intake>> {
        if let Some(range) = &filter.range {
            if !range.is_valid() {
                return Err(AppError::Validation {
                    field: "start_date".to_string(),
                    message: "Start date must not be after end date".to_string(),
                });
            }
        }

        let state = filter.state.map(|s| s.as_str());
        let start = filter.range.as_ref().map(|r| r.start);
        let end = filter.range.as_ref().map(|r| r.end);
        let scope_clause = r#"
            i.business_id = $1
              AND ($2::varchar IS NULL OR i.state = $2)
              AND ($3::date IS NULL OR i.date >= $3)
              AND ($4::date IS NULL OR i.date <= $4)
              AND ($5 OR NOT EXISTS (
                  SELECT 1 FROM intake_details d
                  WHERE d.intake_id = i.id
                    AND NOT EXISTS (
                        SELECT 1 FROM tank_operators o
                        WHERE o.tank_id = d.tank_id AND o.user_id = $6
                    )
              ))
        "#;

        let mut conn = self.db.acquire().await?;
        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM intakes i WHERE {scope_clause}"
        ))
        .bind(ctx.business_id)
        .bind(state)
        .bind(start)
        .bind(end)
        .bind(ctx.full_tank_scope)
        .bind(ctx.actor_id())
        .fetch_one(&mut *conn)
        .await?;

        let rows = sqlx::query_as::<_, IntakeRow>(&format!(
            r#"
            SELECT {INTAKE_COLUMNS}
            FROM intakes i
            WHERE {scope_clause}
            ORDER BY i.date DESC, i.sequence_daily DESC
            LIMIT $7 OFFSET $8
            "#
        ))
        .bind(ctx.business_id)
        .bind(state)
        .bind(start)
        .bind(end)
        .bind(ctx.full_tank_scope)
        .bind(ctx.actor_id())
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&mut *conn)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut details = Self::load_details(&mut conn, &ids).await?;
        let data = rows
            .into_iter()
            .map(|row| {
                let own = details.remove(&row.id).unwrap_or_default();
                row.into_intake(own)
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total.max(0) as u64),
        })
    }

    async fn fetch(
        conn: &mut PgConnection,
        business_id: Uuid,
        intake_id: Uuid,
        for_update: bool,
    ) -> AppResult<Intake> {
        let lock = if for_update { "FOR UPDATE" } else { "" };
        let row = sqlx::query_as::<_, IntakeRow>(&format!(
            "SELECT {INTAKE_COLUMNS} FROM intakes i WHERE i.id = $1 AND i.business_id = $2 {lock}"
        ))
        .bind(intake_id)
        .bind(business_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("Intake", intake_id))?;

        let details = Self::load_details(conn, &[intake_id])
            .await?
            .remove(&intake_id)
            .unwrap_or_default();
        row.into_intake(details)
    }

    async fn load_details(
        conn: &mut PgConnection,
        intake_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, Vec<IntakeDetail>>> {
        if intake_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, DetailRow>(
            r#"
            SELECT id, intake_id, tank_id, liters, meter_start, meter_end,
                   received_liters, posted_liters
            FROM intake_details
            WHERE intake_id = ANY($1)
            ORDER BY intake_id, position
            "#,
        )
        .bind(intake_ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<IntakeDetail>> = HashMap::new();
        for row in rows {
            grouped
                .entry(row.intake_id)
                .or_default()
                .push(row.into_detail());
        }
        Ok(grouped)
    }

    async fn insert(conn: &mut PgConnection, intake: &Intake) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO intakes (
                id, business_id, date, supplier_ref, payment_type_ref, unit_price,
                total_liters, total_amount, state, sequence_global, sequence_daily,
                number, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(intake.id)
        .bind(intake.business_id)
        .bind(intake.date)
        .bind(&intake.supplier_ref)
        .bind(&intake.payment_type_ref)
        .bind(intake.unit_price)
        .bind(intake.total_liters)
        .bind(intake.total_amount)
        .bind(intake.state.as_str())
        .bind(intake.sequence_global)
        .bind(intake.sequence_daily)
        .bind(&intake.number)
        .bind(intake.created_by)
        .bind(intake.created_at)
        .execute(&mut *conn)
        .await?;

        for (position, detail) in intake.details.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO intake_details (id, intake_id, position, tank_id, liters)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(detail.id)
            .bind(intake.id)
            .bind(position as i32)
            .bind(detail.tank_id)
            .bind(detail.liters)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Write back state, driver, readings and actor columns after a transition
    async fn save(conn: &mut PgConnection, intake: &Intake) -> AppResult<()> {
        let driver = intake.driver.as_ref();
        sqlx::query(
            r#"
            UPDATE intakes
            SET state = $2,
                driver_name = $3,
                driver_document = $4,
                driver_plate = $5,
                confirmed_by = $6,
                confirmed_at = $7,
                annulled_by = $8,
                annulled_at = $9,
                annul_reason = $10
            WHERE id = $1
            "#,
        )
        .bind(intake.id)
        .bind(intake.state.as_str())
        .bind(driver.map(|d| d.name.as_str()))
        .bind(driver.map(|d| d.document.as_str()))
        .bind(driver.map(|d| d.plate.as_str()))
        .bind(intake.confirmed_by)
        .bind(intake.confirmed_at)
        .bind(intake.annulled_by)
        .bind(intake.annulled_at)
        .bind(&intake.annul_reason)
        .execute(&mut *conn)
        .await?;

        for detail in &intake.details {
            sqlx::query(
                r#"
                UPDATE intake_details
                SET meter_start = $2, meter_end = $3, received_liters = $4, posted_liters = $5
                WHERE id = $1
                "#,
            )
            .bind(detail.id)
            .bind(detail.meter_start)
            .bind(detail.meter_end)
            .bind(detail.received_liters)
            .bind(detail.posted_liters)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_lock_key_is_stable_per_business() {
        let business = Uuid::new_v4();
        assert_eq!(sequence_lock_key(business), sequence_lock_key(business));
        assert_eq!(sequence_lock_key(Uuid::nil()), 0);
    }
}
