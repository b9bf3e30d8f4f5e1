//! Operator context and tank-scoped authorization

use std::collections::BTreeSet;

use shared::Actor;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::{AuthUser, ClientOrigin};

/// Who is calling, for which business, and how far their tank scope reaches
#[derive(Debug, Clone)]
pub struct OperatorContext {
    pub business_id: Uuid,
    pub actor: Actor,
    pub full_tank_scope: bool,
}

impl OperatorContext {
    pub fn new(user: &AuthUser, origin: &ClientOrigin) -> Self {
        Self {
            business_id: user.business_id,
            actor: Actor::new(user.user_id, origin.0.clone()),
            full_tank_scope: user.has_full_tank_scope(),
        }
    }

    pub fn actor_id(&self) -> Uuid {
        self.actor.id
    }

    /// Fail with `TankAccessDenied` on the first tank the operator is not assigned to
    pub async fn ensure_tank_access(
        &self,
        conn: &mut PgConnection,
        tank_ids: &[Uuid],
    ) -> AppResult<()> {
        if self.full_tank_scope || tank_ids.is_empty() {
            return Ok(());
        }

        let assigned: BTreeSet<Uuid> = sqlx::query_scalar::<_, Uuid>(
            "SELECT tank_id FROM tank_operators WHERE user_id = $1 AND tank_id = ANY($2)",
        )
        .bind(self.actor.id)
        .bind(tank_ids)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .collect();

        match first_unassigned(tank_ids, &assigned) {
            Some(tank_id) => Err(AppError::TankAccessDenied { tank_id }),
            None => Ok(()),
        }
    }
}

/// Decided from assignments alone, so a tank that does not exist is denied
/// the same way as one held by someone else
fn first_unassigned(tank_ids: &[Uuid], assigned: &BTreeSet<Uuid>) -> Option<Uuid> {
    tank_ids.iter().find(|id| !assigned.contains(id)).copied()
}
