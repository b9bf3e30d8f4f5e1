//! In-memory ledger harness
//!
//! Mirrors what the backend does inside a database transaction: copy the
//! rows a transition needs, run the workflow against the copies, and write
//! them back only when the workflow succeeds.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::{
    annul_dispatch, annul_intake, build_intake, check_completion, complete_dispatch,
    confirm_intake, open_dispatch, plan_intake, void_movements, AuditRecord, CompleteDispatch,
    DetailReading, Dispatch, DispatchState, EntityType, Intake, IntakeSequence, IntakeState,
    LedgerPolicy, LedgerResult, Movement, NewIntake, NewIntakeDetail, OpenDispatch, PinVerifier,
    ReceiptConfirmation, Recipient, ReplayReport, Tank, TankBook, TankKind,
};

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

#[derive(Default)]
pub struct PinTable(HashMap<Uuid, String>);

impl PinVerifier for PinTable {
    fn verify(&self, actor_id: Uuid, pin: &str) -> bool {
        self.0.get(&actor_id).is_some_and(|stored| stored == pin)
    }
}

pub struct MemoryLedger {
    pub tanks: BTreeMap<Uuid, Tank>,
    pub intakes: HashMap<Uuid, Intake>,
    pub dispatches: HashMap<Uuid, Dispatch>,
    pub movements: Vec<Movement>,
    pub audit: Vec<AuditRecord>,
    pub pins: PinTable,
    pub policy: LedgerPolicy,
    pub clerk: Uuid,
    clock: DateTime<Utc>,
    sequence: i64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        let mut ledger = Self {
            tanks: BTreeMap::new(),
            intakes: HashMap::new(),
            dispatches: HashMap::new(),
            movements: Vec::new(),
            audit: Vec::new(),
            pins: PinTable::default(),
            policy: LedgerPolicy::default(),
            clerk: Uuid::nil(),
            clock: Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap(),
            sequence: 0,
        };
        ledger.clerk = ledger.add_operator("1234");
        ledger
    }

    pub fn add_tank(&mut self, capacity: &str, stock: &str) -> Uuid {
        let tank = Tank {
            id: Uuid::new_v4(),
            business_id: Uuid::nil(),
            name: format!("Tank {}", self.tanks.len() + 1),
            kind: TankKind::Fixed,
            location_ref: None,
            capacity_max: dec(capacity),
            stock_initial: dec(stock),
            stock_current: dec(stock),
            is_active: true,
        };
        let id = tank.id;
        self.tanks.insert(id, tank);
        id
    }

    pub fn add_operator(&mut self, pin: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.pins.0.insert(id, pin.to_string());
        id
    }

    pub fn stock(&self, tank_id: Uuid) -> Decimal {
        self.tanks[&tank_id].stock_current
    }

    pub fn replay(&self, tank_id: Uuid) -> ReplayReport {
        let tank = &self.tanks[&tank_id];
        let rows: Vec<Movement> = self
            .movements
            .iter()
            .filter(|m| m.tank_id == tank_id)
            .cloned()
            .collect();
        ReplayReport::build(tank_id, tank.stock_initial, tank.stock_current, &rows)
    }

    pub fn intake_state(&self, id: Uuid) -> IntakeState {
        self.intakes[&id].state
    }

    pub fn dispatch_state(&self, id: Uuid) -> DispatchState {
        self.dispatches[&id].state
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn book_for(&self, tank_ids: &[Uuid]) -> TankBook {
        TankBook::new(tank_ids.iter().filter_map(|id| self.tanks.get(id).cloned()))
    }

    fn commit(&mut self, book: TankBook, movements: Vec<Movement>, audit: Vec<AuditRecord>) {
        let now = self.clock;
        let changes = book.into_changes();
        for tank in changes.tanks {
            self.tanks.insert(tank.id, tank);
        }
        self.movements = movements;
        self.movements.extend(
            changes
                .postings
                .into_iter()
                .map(|p| p.into_movement(Uuid::new_v4(), now)),
        );
        self.audit.extend(audit);
    }

    pub fn create_intake(&mut self, details: &[(Uuid, &str)]) -> LedgerResult<Uuid> {
        let input = NewIntake {
            date: day(),
            supplier_ref: "SUP-001".to_string(),
            payment_type_ref: "credit".to_string(),
            unit_price: dec("1.10"),
            details: details
                .iter()
                .map(|(tank_id, liters)| NewIntakeDetail {
                    tank_id: *tank_id,
                    liters: dec(liters),
                })
                .collect(),
        };
        let plan = plan_intake(&input, &self.tanks)?;

        self.sequence += 1;
        let sequence = IntakeSequence {
            global: self.sequence,
            daily: self.sequence as i32,
        };
        let now = self.tick();
        let (intake, audit) = build_intake(input, plan, Uuid::nil(), sequence, self.clerk, now);
        let id = intake.id;
        self.intakes.insert(id, intake);
        self.audit.push(audit);
        Ok(id)
    }

    /// Readings `(meter_start, meter_end)` in detail order
    pub fn readings(&self, intake_id: Uuid, readings: &[(&str, &str)]) -> ReceiptConfirmation {
        let intake = &self.intakes[&intake_id];
        ReceiptConfirmation {
            driver: None,
            readings: intake
                .details
                .iter()
                .zip(readings)
                .map(|(detail, (start, end))| DetailReading {
                    detail_id: detail.id,
                    meter_start: dec(start),
                    meter_end: dec(end),
                    reconciliation: None,
                })
                .collect(),
        }
    }

    pub fn confirm_intake(
        &mut self,
        intake_id: Uuid,
        confirmation: &ReceiptConfirmation,
    ) -> LedgerResult<()> {
        let mut intake = self.intakes[&intake_id].clone();
        let mut book = self.book_for(&intake.tank_ids());
        let now = self.tick();
        let audit = confirm_intake(
            &mut intake,
            confirmation,
            &mut book,
            &self.pins,
            &self.policy,
            self.clerk,
            now,
        )?;
        let movements = self.movements.clone();
        self.commit(book, movements, audit);
        self.intakes.insert(intake_id, intake);
        Ok(())
    }

    /// Create and confirm with readings matching the declared liters
    pub fn receive(&mut self, tank_id: Uuid, liters: &str) -> LedgerResult<Uuid> {
        let id = self.create_intake(&[(tank_id, liters)])?;
        let end = (dec("1000") + dec(liters)).to_string();
        let confirmation = self.readings(id, &[("1000", end.as_str())]);
        self.confirm_intake(id, &confirmation)?;
        Ok(id)
    }

    pub fn annul_intake(&mut self, intake_id: Uuid) -> LedgerResult<()> {
        let mut intake = self.intakes[&intake_id].clone();
        let mut movements = self.movements.clone();
        let voided = match intake.state {
            IntakeState::Finalized => void_movements(&mut movements, EntityType::Intake, intake_id)?,
            _ => vec![],
        };
        let mut book = self.book_for(&intake.tank_ids());
        let now = self.tick();
        let audit = annul_intake(&mut intake, &voided, &mut book, self.clerk, None, now)?;
        self.commit(book, movements, vec![audit]);
        self.intakes.insert(intake_id, intake);
        Ok(())
    }

    pub fn open_dispatch(
        &mut self,
        tank_id: Uuid,
        deliverer_id: Uuid,
        pin: &str,
        meter_start: &str,
    ) -> LedgerResult<Uuid> {
        let input = OpenDispatch {
            tank_id,
            date: day(),
            recipient: Recipient::Internal {
                machine_ref: "EXC-07".to_string(),
                job_ref: "JOB-2024-11".to_string(),
            },
            deliverer_id,
            deliverer_pin: pin.to_string(),
            meter_start: dec(meter_start),
        };
        let now = self.tick();
        let (dispatch, audit) = open_dispatch(
            Uuid::new_v4(),
            &input,
            &self.tanks[&tank_id],
            &self.pins,
            now,
        )?;
        let id = dispatch.id;
        self.dispatches.insert(id, dispatch);
        self.audit.push(audit);
        Ok(id)
    }

    pub fn complete_dispatch(
        &mut self,
        dispatch_id: Uuid,
        input: &CompleteDispatch,
    ) -> LedgerResult<()> {
        let mut dispatch = self.dispatches[&dispatch_id].clone();
        let checked = check_completion(&dispatch, input, &self.pins, &self.policy)?;
        let mut book = self.book_for(&[dispatch.tank_id]);
        let now = self.tick();
        let audit = complete_dispatch(&mut dispatch, checked, input, &mut book, self.clerk, now)?;
        let movements = self.movements.clone();
        self.commit(book, movements, vec![audit]);
        self.dispatches.insert(dispatch_id, dispatch);
        Ok(())
    }

    /// Open and complete an internal dispatch of `liters`
    pub fn draw(&mut self, tank_id: Uuid, liters: &str) -> LedgerResult<Uuid> {
        let deliverer = self.add_operator("1111");
        let receiver = self.add_operator("2222");
        let id = self.open_dispatch(tank_id, deliverer, "1111", "5000")?;
        let input = CompleteDispatch {
            receiver_id: Some(receiver),
            receiver_pin: Some("2222".to_string()),
            meter_end: dec("5000") - dec(liters),
            evidence_ref: None,
        };
        self.complete_dispatch(id, &input)?;
        Ok(id)
    }

    pub fn annul_dispatch(&mut self, dispatch_id: Uuid) -> LedgerResult<()> {
        let mut dispatch = self.dispatches[&dispatch_id].clone();
        let mut movements = self.movements.clone();
        let voided = match dispatch.state {
            DispatchState::Completed => {
                void_movements(&mut movements, EntityType::Dispatch, dispatch_id)?
            }
            _ => vec![],
        };
        let mut book = self.book_for(&[dispatch.tank_id]);
        let now = self.tick();
        let audit = annul_dispatch(&mut dispatch, &voided, &mut book, self.clerk, None, now)?;
        self.commit(book, movements, vec![audit]);
        self.dispatches.insert(dispatch_id, dispatch);
        Ok(())
    }
}
