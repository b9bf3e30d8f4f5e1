//! Tank registry model and stock invariant

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Physical form of a tank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TankKind {
    Fixed,
    Mobile,
}

impl TankKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TankKind::Fixed => "fixed",
            TankKind::Mobile => "mobile",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(TankKind::Fixed),
            "mobile" => Some(TankKind::Mobile),
            _ => None,
        }
    }
}

/// A fuel tank with its capacity and current stock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tank {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub kind: TankKind,
    pub location_ref: Option<String>,
    pub capacity_max: Decimal,
    /// Opening balance the ledger replays from
    pub stock_initial: Decimal,
    pub stock_current: Decimal,
    pub is_active: bool,
}

/// Before/after snapshot of a single stock mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub tank_id: Uuid,
    pub stock_before: Decimal,
    pub stock_after: Decimal,
}

impl StockChange {
    pub fn delta(&self) -> Decimal {
        self.stock_after - self.stock_before
    }
}

impl Tank {
    /// Liters that still fit in the tank
    pub fn available_capacity(&self) -> Decimal {
        self.capacity_max - self.stock_current
    }

    pub fn is_within_bounds(&self) -> bool {
        self.stock_current >= Decimal::ZERO && self.stock_current <= self.capacity_max
    }

    pub fn ensure_active(&self) -> LedgerResult<()> {
        if self.is_active {
            Ok(())
        } else {
            Err(LedgerError::TankInactive { tank_id: self.id })
        }
    }

    /// Check that `liters` more would still fit, without mutating anything
    pub fn reserve_capacity(&self, liters: Decimal) -> LedgerResult<()> {
        if self.stock_current + liters > self.capacity_max {
            return Err(LedgerError::CapacityExceeded {
                tank_id: self.id,
                requested: liters,
                available: self.available_capacity(),
            });
        }
        Ok(())
    }

    /// Apply a signed delta, keeping `0 <= stock_current <= capacity_max`
    pub fn apply_delta(&mut self, delta: Decimal) -> LedgerResult<StockChange> {
        let stock_before = self.stock_current;
        let stock_after = stock_before + delta;

        if stock_after < Decimal::ZERO {
            return Err(LedgerError::NegativeStock {
                tank_id: self.id,
                requested: -delta,
                available: stock_before,
            });
        }
        if stock_after > self.capacity_max {
            return Err(LedgerError::CapacityExceeded {
                tank_id: self.id,
                requested: delta,
                available: self.available_capacity(),
            });
        }

        self.stock_current = stock_after;
        Ok(StockChange {
            tank_id: self.id,
            stock_before,
            stock_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tank(capacity: i64, stock: i64) -> Tank {
        Tank {
            id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            name: "Main diesel".to_string(),
            kind: TankKind::Fixed,
            location_ref: None,
            capacity_max: Decimal::from(capacity),
            stock_initial: Decimal::from(stock),
            stock_current: Decimal::from(stock),
            is_active: true,
        }
    }

    #[test]
    fn test_apply_positive_delta() {
        let mut t = tank(500, 0);
        let change = t.apply_delta(Decimal::from(100)).unwrap();
        assert_eq!(change.stock_before, Decimal::ZERO);
        assert_eq!(change.stock_after, Decimal::from(100));
        assert_eq!(t.stock_current, Decimal::from(100));
    }

    #[test]
    fn test_apply_delta_rejects_negative_stock() {
        let mut t = tank(500, 30);
        let err = t.apply_delta(Decimal::from(-31)).unwrap_err();
        assert!(matches!(err, LedgerError::NegativeStock { .. }));
        assert_eq!(t.stock_current, Decimal::from(30));
    }

    #[test]
    fn test_apply_delta_rejects_overflow() {
        let mut t = tank(500, 480);
        let err = t.apply_delta(Decimal::from(50)).unwrap_err();
        assert!(matches!(err, LedgerError::CapacityExceeded { .. }));
        assert_eq!(t.stock_current, Decimal::from(480));
    }

    #[test]
    fn test_reserve_capacity_exact_fill() {
        let t = tank(500, 480);
        assert!(t.reserve_capacity(Decimal::from(20)).is_ok());
        assert!(t.reserve_capacity(Decimal::from(21)).is_err());
    }

    #[test]
    fn test_inactive_tank() {
        let mut t = tank(500, 0);
        t.is_active = false;
        assert_eq!(
            t.ensure_active(),
            Err(LedgerError::TankInactive { tank_id: t.id })
        );
    }
}
