//! Movement ledger service
//!
//! Persists postings produced by a `TankBook`, voids the movements of an
//! annulled workflow, and replays a tank's ledger for verification.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{
    DateRange, EntityType, LedgerError, Movement, MovementState, MovementType, NewMovement,
    PaginatedResponse, Pagination, PaginationMeta, ReasonCode, ReplayReport, TankBook,
    VoidedMovement,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::access::OperatorContext;
use crate::services::tank::TankService;

/// Ledger service for movement persistence and replay
#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
}

#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    movement_type: String,
    origin_ref: Option<Uuid>,
    tank_id: Uuid,
    liters: Decimal,
    stock_before: Decimal,
    stock_after: Decimal,
    state: String,
    reason_code: Option<String>,
    note: Option<String>,
    actor_id: Uuid,
    created_at: DateTime<Utc>,
}

impl MovementRow {
    fn into_movement(self) -> AppResult<Movement> {
        let reason_code = match self.reason_code.as_deref() {
            Some(code) => Some(
                ReasonCode::from_str(code)
                    .ok_or_else(|| AppError::Internal(format!("Unknown reason code {}", code)))?,
            ),
            None => None,
        };

        Ok(Movement {
            id: self.id,
            movement_type: MovementType::from_str(&self.movement_type).ok_or_else(|| {
                AppError::Internal(format!("Unknown movement type {}", self.movement_type))
            })?,
            origin_ref: self.origin_ref,
            tank_id: self.tank_id,
            liters: self.liters,
            stock_before: self.stock_before,
            stock_after: self.stock_after,
            state: MovementState::from_str(&self.state)
                .ok_or_else(|| AppError::Internal(format!("Unknown movement state {}", self.state)))?,
            reason_code,
            note: self.note,
            actor_id: self.actor_id,
            created_at: self.created_at,
        })
    }
}

const MOVEMENT_COLUMNS: &str = "id, movement_type, origin_ref, tank_id, liters, stock_before, \
                                stock_after, state, reason_code, note, actor_id, created_at";

impl LedgerService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Write a book's stock changes and postings in the caller's transaction
    pub(crate) async fn commit_book(
        conn: &mut PgConnection,
        business_id: Uuid,
        book: TankBook,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Movement>> {
        let changes = book.into_changes();
        TankService::write_stock(conn, &changes.tanks).await?;

        let mut movements = Vec::with_capacity(changes.postings.len());
        for posting in changes.postings {
            movements.push(Self::append(conn, business_id, posting, now).await?);
        }
        Ok(movements)
    }

    async fn append(
        conn: &mut PgConnection,
        business_id: Uuid,
        posting: NewMovement,
        now: DateTime<Utc>,
    ) -> AppResult<Movement> {
        let movement = posting.into_movement(Uuid::new_v4(), now);
        sqlx::query(
            r#"
            INSERT INTO movements (
                id, business_id, movement_type, origin_ref, tank_id, liters,
                stock_before, stock_after, state, reason_code, note, actor_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(movement.id)
        .bind(business_id)
        .bind(movement.movement_type.as_str())
        .bind(movement.origin_ref)
        .bind(movement.tank_id)
        .bind(movement.liters)
        .bind(movement.stock_before)
        .bind(movement.stock_after)
        .bind(movement.state.as_str())
        .bind(movement.reason_code.map(|r| r.as_str()))
        .bind(&movement.note)
        .bind(movement.actor_id)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(movement)
    }

    /// Flip every active movement of an origin to annulled
    pub(crate) async fn void_origin(
        conn: &mut PgConnection,
        entity: EntityType,
        origin_ref: Uuid,
    ) -> AppResult<Vec<VoidedMovement>> {
        let voided = sqlx::query_as::<_, (Uuid, Uuid, Decimal)>(
            r#"
            UPDATE movements
            SET state = 'annulled'
            WHERE origin_ref = $1 AND state = 'active'
            RETURNING id, tank_id, liters
            "#,
        )
        .bind(origin_ref)
        .fetch_all(&mut *conn)
        .await?;

        if voided.is_empty() {
            return Err(LedgerError::AlreadyVoided {
                entity,
                id: origin_ref,
            }
            .into());
        }

        Ok(voided
            .into_iter()
            .map(|(id, tank_id, liters)| VoidedMovement {
                id,
                tank_id,
                liters,
            })
            .collect())
    }

    /// Movements of a tank, newest first
    pub async fn list_movements(
        &self,
        ctx: &OperatorContext,
        tank_id: Uuid,
        range: Option<DateRange>,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Movement>> {
        let mut conn = self.db.acquire().await?;
        ctx.ensure_tank_access(&mut conn, &[tank_id]).await?;
        TankService::fetch(&mut conn, ctx.business_id, tank_id).await?;

        if let Some(range) = &range {
            if !range.is_valid() {
                return Err(AppError::Validation {
                    field: "start_date".to_string(),
                    message: "Start date must not be after end date".to_string(),
                });
            }
        }
        let start = range.as_ref().map(DateRange::start_instant);
        let end = range.as_ref().map(DateRange::end_exclusive_instant);

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM movements
            WHERE tank_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            "#,
        )
        .bind(tank_id)
        .bind(start)
        .bind(end)
        .fetch_one(&mut *conn)
        .await?;

        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM movements
            WHERE tank_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            ORDER BY created_at DESC, entry_no DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(tank_id)
        .bind(start)
        .bind(end)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&mut *conn)
        .await?;

        Ok(PaginatedResponse {
            data: rows
                .into_iter()
                .map(MovementRow::into_movement)
                .collect::<AppResult<Vec<_>>>()?,
            pagination: PaginationMeta::new(&pagination, total.max(0) as u64),
        })
    }

    /// Replay a tank's active movements against its stored stock
    pub async fn verify_tank(&self, ctx: &OperatorContext, tank_id: Uuid) -> AppResult<ReplayReport> {
        let mut conn = self.db.acquire().await?;
        ctx.ensure_tank_access(&mut conn, &[tank_id]).await?;
        let tank = TankService::fetch(&mut conn, ctx.business_id, tank_id).await?;

        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM movements
            WHERE tank_id = $1 AND state = 'active'
            ORDER BY created_at ASC, entry_no ASC
            "#
        ))
        .bind(tank_id)
        .fetch_all(&mut *conn)
        .await?;
        let movements = rows
            .into_iter()
            .map(MovementRow::into_movement)
            .collect::<AppResult<Vec<_>>>()?;

        let report =
            ReplayReport::build(tank.id, tank.stock_initial, tank.stock_current, &movements);
        if !report.consistent {
            tracing::warn!(
                %tank_id,
                stored = %report.stock_current,
                replayed = %report.replayed_stock,
                "Tank stock disagrees with its ledger"
            );
        }
        Ok(report)
    }
}
