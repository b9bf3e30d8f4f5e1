//! Tank registry service
//!
//! Reads tanks, locks them for workflow transactions and writes their stock
//! back. Stock is only ever written from a committed `TankBook`.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use shared::{lock_order, LedgerError, Tank, TankBook, TankKind};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::access::OperatorContext;

/// Tank service for registry reads and locked stock access
#[derive(Clone)]
pub struct TankService {
    db: PgPool,
}

#[derive(Debug, FromRow)]
pub(crate) struct TankRow {
    id: Uuid,
    business_id: Uuid,
    name: String,
    kind: String,
    location_ref: Option<String>,
    capacity_max: Decimal,
    stock_initial: Decimal,
    stock_current: Decimal,
    is_active: bool,
}

impl TankRow {
    fn into_tank(self) -> AppResult<Tank> {
        Ok(Tank {
            id: self.id,
            business_id: self.business_id,
            name: self.name,
            kind: TankKind::from_str(&self.kind)
                .ok_or_else(|| AppError::Internal(format!("Unknown tank kind {}", self.kind)))?,
            location_ref: self.location_ref,
            capacity_max: self.capacity_max,
            stock_initial: self.stock_initial,
            stock_current: self.stock_current,
            is_active: self.is_active,
        })
    }
}

const TANK_COLUMNS: &str = "id, business_id, name, kind, location_ref, capacity_max, \
                            stock_initial, stock_current, is_active";

impl TankService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Current stock and capacity of one tank
    pub async fn get_tank(&self, ctx: &OperatorContext, tank_id: Uuid) -> AppResult<Tank> {
        let mut conn = self.db.acquire().await?;
        ctx.ensure_tank_access(&mut conn, &[tank_id]).await?;
        Self::fetch(&mut conn, ctx.business_id, tank_id).await
    }

    /// Tanks the operator may work on, by name
    pub async fn list_tanks(&self, ctx: &OperatorContext) -> AppResult<Vec<Tank>> {
        let rows = sqlx::query_as::<_, TankRow>(&format!(
            r#"
            SELECT {TANK_COLUMNS}
            FROM tanks t
            WHERE t.business_id = $1
              AND ($2 OR EXISTS (
                  SELECT 1 FROM tank_operators o WHERE o.tank_id = t.id AND o.user_id = $3
              ))
            ORDER BY t.name ASC
            "#
        ))
        .bind(ctx.business_id)
        .bind(ctx.full_tank_scope)
        .bind(ctx.actor_id())
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(TankRow::into_tank).collect()
    }

    pub(crate) async fn fetch(
        conn: &mut PgConnection,
        business_id: Uuid,
        tank_id: Uuid,
    ) -> AppResult<Tank> {
        sqlx::query_as::<_, TankRow>(&format!(
            "SELECT {TANK_COLUMNS} FROM tanks WHERE id = $1 AND business_id = $2"
        ))
        .bind(tank_id)
        .bind(business_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::Ledger(LedgerError::UnknownTank { tank_id }))?
        .into_tank()
    }

    /// Unlocked snapshot of several tanks, for soft checks
    pub(crate) async fn snapshot(
        conn: &mut PgConnection,
        business_id: Uuid,
        tank_ids: &[Uuid],
    ) -> AppResult<BTreeMap<Uuid, Tank>> {
        let rows = sqlx::query_as::<_, TankRow>(&format!(
            "SELECT {TANK_COLUMNS} FROM tanks WHERE business_id = $1 AND id = ANY($2)"
        ))
        .bind(business_id)
        .bind(tank_ids)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter()
            .map(|row| row.into_tank().map(|t| (t.id, t)))
            .collect()
    }

    /// Lock tanks `FOR UPDATE` in ascending id order and load them into a book
    pub(crate) async fn lock(
        conn: &mut PgConnection,
        business_id: Uuid,
        tank_ids: &[Uuid],
    ) -> AppResult<TankBook> {
        let ordered = lock_order(tank_ids.iter().copied());
        let rows = sqlx::query_as::<_, TankRow>(&format!(
            r#"
            SELECT {TANK_COLUMNS}
            FROM tanks
            WHERE business_id = $1 AND id = ANY($2)
            ORDER BY id
            FOR UPDATE
            "#
        ))
        .bind(business_id)
        .bind(&ordered)
        .fetch_all(&mut *conn)
        .await?;

        let tanks = rows
            .into_iter()
            .map(TankRow::into_tank)
            .collect::<AppResult<Vec<_>>>()?;
        if let Some(missing) = ordered.iter().find(|id| !tanks.iter().any(|t| t.id == **id)) {
            return Err(LedgerError::UnknownTank { tank_id: *missing }.into());
        }
        Ok(TankBook::new(tanks))
    }

    /// Write back the stock of tanks changed by a book
    pub(crate) async fn write_stock(conn: &mut PgConnection, tanks: &[Tank]) -> AppResult<()> {
        for tank in tanks {
            sqlx::query("UPDATE tanks SET stock_current = $1, updated_at = NOW() WHERE id = $2")
                .bind(tank.stock_current)
                .bind(tank.id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}
