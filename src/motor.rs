//! Motor binding: the seam between the configuration table and the control
//! bus.
//!
//! A column's `motor_name` is a dotted path (e.g.
//! `timing_system.channels.hsc.delay`). The [`MotorBank`] resolves such a
//! path to a live endpoint by whole-string lookup; the core never interprets
//! the path beyond validating its grammar at registration time. Endpoints
//! implement the [`Motorized`] capability trait, which is all the apply
//! engine and proxies ever see, so real EPICS channels and test doubles are
//! interchangeable.
//!
//! # Contract
//!
//! - `get_nominal` / `set_nominal` access the setpoint; `get_actual` the
//!   readback. `set_nominal(NaN)` is a no-op (the cell carries no meaningful
//!   setpoint for that mode).
//! - `wait_done` polls until motion completes; `Ok(false)` means the motor
//!   was still moving when the per-motor budget ran out.
//! - `updates()` is a broadcast stream of readback changes. It may be fed
//!   from a background source; consumers MUST marshal events onto the task
//!   that owns the table (see [`forward_updates`]) before touching table
//!   state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::error::{MotorError, TableError, TableResult};

/// A readback change notification from the bus.
#[derive(Clone, Debug, Serialize)]
pub struct ReadbackUpdate {
    /// Dotted motor name.
    pub motor: String,
    /// New readback value.
    pub value: f64,
    /// When the update was observed.
    pub timestamp: DateTime<Utc>,
}

/// Capability trait for a single live setpoint/readback pair.
///
/// All methods take `&self`; implementations use interior mutability so a
/// motor can be shared between the apply engine and proxies by reference.
#[async_trait]
pub trait Motorized: Send + Sync {
    /// Dotted motor name as registered with the bank.
    fn name(&self) -> &str;

    /// Read the nominal setpoint.
    async fn get_nominal(&self) -> Result<f64, MotorError>;

    /// Write the nominal setpoint. NaN is a no-op.
    async fn set_nominal(&self, value: f64) -> Result<(), MotorError>;

    /// Read the live readback.
    async fn get_actual(&self) -> Result<f64, MotorError>;

    /// Wait until motion completes. `Ok(false)` means the motor was still
    /// moving when `timeout` elapsed.
    async fn wait_done(&self, timeout: Duration) -> Result<bool, MotorError>;

    /// Per-motor tolerance override. `None` falls back to the column
    /// tolerance.
    fn tolerance(&self) -> Option<f64> {
        None
    }

    /// Subscribe to readback change notifications.
    fn updates(&self) -> broadcast::Receiver<ReadbackUpdate>;
}

/// Validate the motor-name grammar: `seg(.seg)*`, each segment a plain
/// identifier or `identifier[index]`.
pub fn validate_motor_name(name: &str) -> TableResult<()> {
    fn valid_segment(seg: &str) -> bool {
        let (ident, index) = match seg.split_once('[') {
            Some((id, rest)) => match rest.strip_suffix(']') {
                Some(idx) => (id, Some(idx)),
                None => return false,
            },
            None => (seg, None),
        };
        let mut chars = ident.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        if !(first.is_ascii_alphabetic() || first == '_') {
            return false;
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
        match index {
            Some(idx) => !idx.is_empty() && idx.chars().all(|c| c.is_ascii_digit()),
            None => true,
        }
    }

    if name.split('.').all(valid_segment) {
        Ok(())
    } else {
        Err(TableError::Schema(format!("invalid motor name '{name}'")))
    }
}

/// Registry mapping dotted motor names to live endpoints.
///
/// The bank is shared by reference (`Arc`) between the apply engine, the
/// proxies and the owning application; it is never copied. Unresolvable
/// names surface as [`MotorError::Offline`], the same as an unreachable bus.
#[derive(Default)]
pub struct MotorBank {
    motors: HashMap<String, Arc<dyn Motorized>>,
}

impl MotorBank {
    /// Empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint under its own name. Re-registration replaces
    /// the previous endpoint.
    pub fn register(&mut self, motor: Arc<dyn Motorized>) -> TableResult<()> {
        let name = motor.name().to_string();
        validate_motor_name(&name)?;
        if self.motors.insert(name.clone(), motor).is_some() {
            log::warn!("motor '{name}' re-registered, replacing previous endpoint");
        }
        Ok(())
    }

    /// Whether a name resolves.
    pub fn contains(&self, name: &str) -> bool {
        self.motors.contains_key(name)
    }

    /// Resolve a dotted name to its endpoint.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Motorized>, MotorError> {
        self.motors
            .get(name)
            .cloned()
            .ok_or_else(|| MotorError::Offline(name.to_string()))
    }

    /// Read the nominal setpoint of a named motor.
    pub async fn get_nominal(&self, name: &str) -> Result<f64, MotorError> {
        self.resolve(name)?.get_nominal().await
    }

    /// Write the nominal setpoint of a named motor.
    pub async fn set_nominal(&self, name: &str, value: f64) -> Result<(), MotorError> {
        self.resolve(name)?.set_nominal(value).await
    }

    /// Read the live readback of a named motor.
    pub async fn get_actual(&self, name: &str) -> Result<f64, MotorError> {
        self.resolve(name)?.get_actual().await
    }

    /// Wait for a named motor to finish moving.
    pub async fn wait_done(&self, name: &str, timeout: Duration) -> Result<bool, MotorError> {
        self.resolve(name)?.wait_done(timeout).await
    }

    /// Effective tolerance for a motor: the per-motor override when the
    /// endpoint provides one, otherwise the column fallback.
    pub fn tolerance_for(&self, name: &str, fallback: f64) -> f64 {
        self.motors
            .get(name)
            .and_then(|m| m.tolerance())
            .unwrap_or(fallback)
    }
}

/// Forward a readback broadcast stream into an `mpsc` channel owned by the
/// table's task. This is the marshaling step: background notifications must
/// cross onto the owning task before they touch table state.
pub fn forward_updates(
    mut rx: broadcast::Receiver<ReadbackUpdate>,
    tx: mpsc::Sender<ReadbackUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    if tx.send(update).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("readback stream lagged, dropped {n} update(s)");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// =============================================================================
// MockMotor - simulated bus endpoint
// =============================================================================

/// Simulated motor endpoint for tests and offline development.
///
/// Tracks every accepted setpoint write so tests can assert exactly which
/// bus traffic an operation produced, and can be switched offline or given
/// soft limits to exercise the error paths.
pub struct MockMotor {
    name: String,
    nominal: Arc<RwLock<f64>>,
    limits: Option<(f64, f64)>,
    tolerance: Option<f64>,
    settle: Duration,
    settle_deadline: Arc<RwLock<Option<Instant>>>,
    offline: AtomicBool,
    writes: Arc<RwLock<Vec<f64>>>,
    updates_tx: broadcast::Sender<ReadbackUpdate>,
}

impl MockMotor {
    /// New mock motor at the given position, settling instantly.
    pub fn new(name: impl Into<String>, initial: f64) -> Self {
        let (updates_tx, _) = broadcast::channel(64);
        Self {
            name: name.into(),
            nominal: Arc::new(RwLock::new(initial)),
            limits: None,
            tolerance: None,
            settle: Duration::ZERO,
            settle_deadline: Arc::new(RwLock::new(None)),
            offline: AtomicBool::new(false),
            writes: Arc::new(RwLock::new(Vec::new())),
            updates_tx,
        }
    }

    /// Reject setpoints outside `[low, high]` with `OutOfRange`.
    pub fn with_limits(mut self, low: f64, high: f64) -> Self {
        self.limits = Some((low, high));
        self
    }

    /// Report a per-motor tolerance override.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Simulate motion: `wait_done` reports moving for this long after each
    /// accepted write.
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Switch the simulated bus connection on or off.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every setpoint accepted so far, in write order.
    pub async fn writes(&self) -> Vec<f64> {
        self.writes.read().await.clone()
    }

    fn check_online(&self) -> Result<(), MotorError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(MotorError::Offline(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Motorized for MockMotor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_nominal(&self) -> Result<f64, MotorError> {
        self.check_online()?;
        Ok(*self.nominal.read().await)
    }

    async fn set_nominal(&self, value: f64) -> Result<(), MotorError> {
        self.check_online()?;
        if value.is_nan() {
            log::debug!("motor '{}': NaN setpoint ignored", self.name);
            return Ok(());
        }
        if let Some((low, high)) = self.limits {
            if value < low || value > high {
                return Err(MotorError::OutOfRange {
                    motor: self.name.clone(),
                    value,
                });
            }
        }
        *self.nominal.write().await = value;
        self.writes.write().await.push(value);
        *self.settle_deadline.write().await = Some(Instant::now() + self.settle);
        // Ignore send errors: no subscribers is normal.
        let _ = self.updates_tx.send(ReadbackUpdate {
            motor: self.name.clone(),
            value,
            timestamp: Utc::now(),
        });
        log::debug!("motor '{}': setpoint {} written", self.name, value);
        Ok(())
    }

    async fn get_actual(&self) -> Result<f64, MotorError> {
        self.check_online()?;
        Ok(*self.nominal.read().await)
    }

    async fn wait_done(&self, timeout: Duration) -> Result<bool, MotorError> {
        self.check_online()?;
        let started = Instant::now();
        loop {
            let done = match *self.settle_deadline.read().await {
                Some(deadline) => Instant::now() >= deadline,
                None => true,
            };
            if done {
                return Ok(true);
            }
            if started.elapsed() >= timeout {
                return Ok(false);
            }
            sleep(Duration::from_millis(2)).await;
        }
    }

    fn tolerance(&self) -> Option<f64> {
        self.tolerance
    }

    fn updates(&self) -> broadcast::Receiver<ReadbackUpdate> {
        self.updates_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motor_name_grammar() {
        assert!(validate_motor_name("ChopX").is_ok());
        assert!(validate_motor_name("timing_system.channels.hsc.delay").is_ok());
        assert!(validate_motor_name("rack.slot[3].motor").is_ok());
        assert!(validate_motor_name("").is_err());
        assert!(validate_motor_name("a..b").is_err());
        assert!(validate_motor_name("3axis").is_err());
        assert!(validate_motor_name("slot[").is_err());
        assert!(validate_motor_name("slot[x]").is_err());
    }

    #[tokio::test]
    async fn nan_setpoint_is_a_no_op() {
        let motor = MockMotor::new("chopper.X", 37.28);
        motor.set_nominal(f64::NAN).await.unwrap();
        assert_eq!(motor.get_nominal().await.unwrap(), 37.28);
        assert!(motor.writes().await.is_empty());
    }

    #[tokio::test]
    async fn offline_motor_reports_offline() {
        let motor = MockMotor::new("chopper.X", 0.0);
        motor.set_offline(true);
        assert_eq!(
            motor.get_nominal().await.unwrap_err(),
            MotorError::Offline("chopper.X".into())
        );
        assert!(motor.set_nominal(1.0).await.is_err());
    }

    #[tokio::test]
    async fn limits_reject_out_of_range() {
        let motor = MockMotor::new("chopper.Y", 0.0).with_limits(-5.0, 5.0);
        match motor.set_nominal(12.0).await.unwrap_err() {
            MotorError::OutOfRange { motor, value } => {
                assert_eq!(motor, "chopper.Y");
                assert_eq!(value, 12.0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(motor.writes().await.is_empty());
    }

    #[tokio::test]
    async fn bank_resolves_and_falls_back_on_tolerance() {
        let mut bank = MotorBank::new();
        bank.register(Arc::new(
            MockMotor::new("chopper.X", 1.0).with_tolerance(0.01),
        ))
        .unwrap();
        bank.register(Arc::new(MockMotor::new("chopper.Y", 2.0)))
            .unwrap();

        assert_eq!(bank.get_nominal("chopper.X").await.unwrap(), 1.0);
        assert_eq!(bank.tolerance_for("chopper.X", 0.001), 0.01);
        assert_eq!(bank.tolerance_for("chopper.Y", 0.001), 0.001);
        assert!(matches!(
            bank.get_nominal("missing.motor").await,
            Err(MotorError::Offline(_))
        ));
    }

    #[tokio::test]
    async fn writes_broadcast_readback_updates() {
        let motor = MockMotor::new("chopper.X", 0.0);
        let mut rx = motor.updates();
        motor.set_nominal(33.79).await.unwrap();
        let update = rx.recv().await.unwrap();
        assert_eq!(update.motor, "chopper.X");
        assert_eq!(update.value, 33.79);
    }

    #[tokio::test]
    async fn updates_are_marshaled_through_mpsc() {
        let motor = MockMotor::new("chopper.X", 0.0);
        let (tx, mut owner_rx) = mpsc::channel(8);
        let handle = forward_updates(motor.updates(), tx);

        motor.set_nominal(1.5).await.unwrap();
        let update = owner_rx.recv().await.unwrap();
        assert_eq!(update.value, 1.5);
        handle.abort();
    }

    #[tokio::test]
    async fn wait_done_reports_still_moving_then_settles() {
        let motor = MockMotor::new("stage.x", 0.0).with_settle_time(Duration::from_millis(40));
        motor.set_nominal(5.0).await.unwrap();
        assert!(!motor.wait_done(Duration::from_millis(5)).await.unwrap());
        assert!(motor.wait_done(Duration::from_secs(1)).await.unwrap());
    }
}
