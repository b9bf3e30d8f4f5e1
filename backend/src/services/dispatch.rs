//! Dispatch workflow service

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    annul_dispatch, check_completion, complete_dispatch, open_dispatch, CompleteDispatch,
    DateRange, Dispatch, DispatchState, EntityType, LedgerError, LedgerPolicy, OpenDispatch,
    PaginatedResponse, Pagination, PaginationMeta, Recipient,
};
use sqlx::{types::Json, FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::AnnulOutcome;
use crate::services::access::OperatorContext;
use crate::services::audit::AuditService;
use crate::services::ledger::LedgerService;
use crate::services::pin::CredentialSet;
use crate::services::tank::TankService;

/// Dispatch service for fuel withdrawals
#[derive(Clone)]
pub struct DispatchService {
    db: PgPool,
    policy: LedgerPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchFilter {
    pub state: Option<DispatchState>,
    pub tank_id: Option<Uuid>,
    pub range: Option<DateRange>,
}

#[derive(Debug, FromRow)]
struct DispatchRow {
    id: Uuid,
    business_id: Uuid,
    date: NaiveDate,
    tank_id: Uuid,
    recipient: Json<Recipient>,
    deliverer_id: Uuid,
    receiver_id: Option<Uuid>,
    meter_start: Decimal,
    meter_end: Option<Decimal>,
    liters: Option<Decimal>,
    state: String,
    evidence_ref: Option<String>,
    created_at: DateTime<Utc>,
    completed_by: Option<Uuid>,
    completed_at: Option<DateTime<Utc>>,
    annulled_by: Option<Uuid>,
    annulled_at: Option<DateTime<Utc>>,
    annul_reason: Option<String>,
}

impl DispatchRow {
    fn into_dispatch(self) -> AppResult<Dispatch> {
        Ok(Dispatch {
            id: self.id,
            business_id: self.business_id,
            date: self.date,
            tank_id: self.tank_id,
            recipient: self.recipient.0,
            deliverer_id: self.deliverer_id,
            receiver_id: self.receiver_id,
            meter_start: self.meter_start,
            meter_end: self.meter_end,
            liters: self.liters,
            state: DispatchState::from_str(&self.state).ok_or_else(|| {
                AppError::Internal(format!("Unknown dispatch state {}", self.state))
            })?,
            evidence_ref: self.evidence_ref,
            created_at: self.created_at,
            completed_by: self.completed_by,
            completed_at: self.completed_at,
            annulled_by: self.annulled_by,
            annulled_at: self.annulled_at,
            annul_reason: self.annul_reason,
        })
    }
}

const DISPATCH_COLUMNS: &str = "id, business_id, date, tank_id, recipient, deliverer_id, \
     receiver_id, meter_start, meter_end, liters, state, evidence_ref, created_at, completed_by, \
     completed_at, annulled_by, annulled_at, annul_reason";

impl DispatchService {
    pub fn new(db: PgPool, policy: LedgerPolicy) -> Self {
        Self { db, policy }
    }

    /// Open a dispatch once the deliverer's PIN checks out
    pub async fn open(&self, ctx: &OperatorContext, input: OpenDispatch) -> AppResult<Dispatch> {
        let dispatch_id = Uuid::new_v4();
        let mut tx = self.db.begin().await?;

        ctx.ensure_tank_access(&mut tx, &[input.tank_id]).await?;
        let tank = TankService::fetch(&mut tx, ctx.business_id, input.tank_id).await?;
        let pins = CredentialSet::load(&mut tx, ctx.business_id, &[input.deliverer_id]).await?;

        let opened = open_dispatch(dispatch_id, &input, &tank, &pins, Utc::now());
        let (dispatch, audit) = match opened {
            Ok(opened) => opened,
            Err(LedgerError::InvalidPin { actor_id }) => {
                tx.rollback().await?;
                self.reject_pin(ctx, dispatch_id, actor_id).await?;
                return Err(LedgerError::InvalidPin { actor_id }.into());
            }
            Err(e) => return Err(e.into()),
        };

        Self::insert(&mut tx, &dispatch).await?;
        AuditService::record_all(&mut tx, ctx.business_id, &ctx.actor, &[audit]).await?;
        tx.commit().await?;

        tracing::info!(
            dispatch_id = %dispatch.id,
            tank_id = %dispatch.tank_id,
            recipient = dispatch.recipient.kind().as_str(),
            "Dispatch opened"
        );
        Ok(dispatch)
    }

    /// Close an OPEN dispatch and drain its tank
    pub async fn complete(
        &self,
        ctx: &OperatorContext,
        dispatch_id: Uuid,
        input: CompleteDispatch,
    ) -> AppResult<Dispatch> {
        let mut tx = self.db.begin().await?;
        let mut dispatch = Self::fetch(&mut tx, ctx.business_id, dispatch_id, true).await?;
        ctx.ensure_tank_access(&mut tx, &[dispatch.tank_id]).await?;

        let receivers: Vec<Uuid> = input.receiver_id.into_iter().collect();
        let pins = CredentialSet::load(&mut tx, ctx.business_id, &receivers).await?;
        let checked = check_completion(&dispatch, &input, &pins, &self.policy);
        let checked = match checked {
            Ok(checked) => checked,
            Err(LedgerError::InvalidPin { actor_id }) => {
                tx.rollback().await?;
                self.reject_pin(ctx, dispatch_id, actor_id).await?;
                return Err(LedgerError::InvalidPin { actor_id }.into());
            }
            Err(e) => return Err(e.into()),
        };

        let mut book = TankService::lock(&mut tx, ctx.business_id, &[dispatch.tank_id]).await?;
        let now = Utc::now();
        let audit = complete_dispatch(
            &mut dispatch,
            checked,
            &input,
            &mut book,
            ctx.actor_id(),
            now,
        )?;

        LedgerService::commit_book(&mut tx, ctx.business_id, book, now).await?;
        Self::save(&mut tx, &dispatch).await?;
        AuditService::record_all(&mut tx, ctx.business_id, &ctx.actor, &[audit]).await?;
        tx.commit().await?;

        tracing::info!(
            %dispatch_id,
            tank_id = %dispatch.tank_id,
            liters = %checked.liters(),
            "Dispatch completed"
        );
        Ok(dispatch)
    }

    /// Annul a dispatch, returning the fuel to its tank when it was completed
    pub async fn annul(
        &self,
        ctx: &OperatorContext,
        dispatch_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<AnnulOutcome<Dispatch>> {
        let mut tx = self.db.begin().await?;
        let mut dispatch = Self::fetch(&mut tx, ctx.business_id, dispatch_id, true).await?;
        ctx.ensure_tank_access(&mut tx, &[dispatch.tank_id]).await?;

        if dispatch.state == DispatchState::Annulled {
            tracing::debug!(%dispatch_id, "Dispatch already annulled");
            return Ok(AnnulOutcome::unchanged(dispatch));
        }

        let mut book = TankService::lock(&mut tx, ctx.business_id, &[dispatch.tank_id]).await?;
        let voided = if dispatch.state == DispatchState::Completed {
            LedgerService::void_origin(&mut tx, EntityType::Dispatch, dispatch_id).await?
        } else {
            Vec::new()
        };

        let now = Utc::now();
        let audit = annul_dispatch(
            &mut dispatch,
            &voided,
            &mut book,
            ctx.actor_id(),
            reason,
            now,
        )
        .map_err(|e| {
            if let LedgerError::CapacityExceeded {
                tank_id,
                requested,
                available,
            } = &e
            {
                tracing::warn!(
                    %dispatch_id,
                    %tank_id,
                    %requested,
                    %available,
                    "Dispatch reversal blocked"
                );
            }
            e
        })?;

        LedgerService::commit_book(&mut tx, ctx.business_id, book, now).await?;
        Self::save(&mut tx, &dispatch).await?;
        AuditService::record_all(&mut tx, ctx.business_id, &ctx.actor, &[audit]).await?;
        tx.commit().await?;

        tracing::info!(
            %dispatch_id,
            tank_id = %dispatch.tank_id,
            restored = !voided.is_empty(),
            "Dispatch annulled"
        );
        Ok(AnnulOutcome::annulled(dispatch))
    }

    pub async fn get(&self, ctx: &OperatorContext, dispatch_id: Uuid) -> AppResult<Dispatch> {
        let mut conn = self.db.acquire().await?;
        let dispatch = Self::fetch(&mut conn, ctx.business_id, dispatch_id, false).await?;
        ctx.ensure_tank_access(&mut conn, &[dispatch.tank_id]).await?;
        Ok(dispatch)
    }

    /// List dispatches the operator can see, newest first
    pub async fn list(
        &self,
        ctx: &OperatorContext,
        filter: DispatchFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Dispatch>> {
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
        let where_clause = r#"
            business_id = $1
              AND ($2::varchar IS NULL OR state = $2)
              AND ($3::uuid IS NULL OR tank_id = $3)
              AND ($4::date IS NULL OR date >= $4)
              AND ($5::date IS NULL OR date <= $5)
              AND ($6 OR tank_id IN (SELECT tank_id FROM tank_operators WHERE user_id = $7))
        "#;

        let mut conn = self.db.acquire().await?;
        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM dispatches WHERE {where_clause}"
        ))
        .bind(ctx.business_id)
        .bind(state)
        .bind(filter.tank_id)
        .bind(start)
        .bind(end)
        .bind(ctx.full_tank_scope)
        .bind(ctx.actor_id())
        .fetch_one(&mut *conn)
        .await?;

        let rows = sqlx::query_as::<_, DispatchRow>(&format!(
            r#"
            SELECT {DISPATCH_COLUMNS}
            FROM dispatches
            WHERE {where_clause}
            ORDER BY created_at DESC
            LIMIT $8 OFFSET $9
            "#
        ))
        .bind(ctx.business_id)
        .bind(state)
        .bind(filter.tank_id)
        .bind(start)
        .bind(end)
        .bind(ctx.full_tank_scope)
        .bind(ctx.actor_id())
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&mut *conn)
        .await?;

        Ok(PaginatedResponse {
            data: rows
                .into_iter()
                .map(DispatchRow::into_dispatch)
                .collect::<AppResult<Vec<_>>>()?,
            pagination: PaginationMeta::new(&pagination, total.max(0) as u64),
        })
    }

    async fn reject_pin(
        &self,
        ctx: &OperatorContext,
        dispatch_id: Uuid,
        rejected: Uuid,
    ) -> AppResult<()> {
        AuditService::new(self.db.clone())
            .record_pin_rejection(
                ctx.business_id,
                &ctx.actor,
                EntityType::Dispatch,
                dispatch_id,
                rejected,
            )
            .await
    }

    async fn fetch(
        conn: &mut PgConnection,
        business_id: Uuid,
        dispatch_id: Uuid,
        for_update: bool,
    ) -> AppResult<Dispatch> {
        let lock = if for_update { "FOR UPDATE" } else { "" };
        sqlx::query_as::<_, DispatchRow>(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM dispatches WHERE id = $1 AND business_id = $2 {lock}"
        ))
        .bind(dispatch_id)
        .bind(business_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("Dispatch", dispatch_id))?
        .into_dispatch()
    }

    async fn insert(conn: &mut PgConnection, dispatch: &Dispatch) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dispatches (
                id, business_id, date, tank_id, recipient, deliverer_id,
                meter_start, state, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(dispatch.id)
        .bind(dispatch.business_id)
        .bind(dispatch.date)
        .bind(dispatch.tank_id)
        .bind(Json(&dispatch.recipient))
        .bind(dispatch.deliverer_id)
        .bind(dispatch.meter_start)
        .bind(dispatch.state.as_str())
        .bind(dispatch.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn save(conn: &mut PgConnection, dispatch: &Dispatch) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE dispatches
            SET state = $2,
                receiver_id = $3,
                meter_end = $4,
                liters = $5,
                evidence_ref = $6,
                completed_by = $7,
                completed_at = $8,
                annulled_by = $9,
                annulled_at = $10,
                annul_reason = $11
            WHERE id = $1
            "#,
        )
        .bind(dispatch.id)
        .bind(dispatch.state.as_str())
        .bind(dispatch.receiver_id)
        .bind(dispatch.meter_end)
        .bind(dispatch.liters)
        .bind(&dispatch.evidence_ref)
        .bind(dispatch.completed_by)
        .bind(dispatch.completed_at)
        .bind(dispatch.annulled_by)
        .bind(dispatch.annulled_at)
        .bind(&dispatch.annul_reason)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
