use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tokio::time::Instant;
use toyota_api::fetch_features;
use toyota_api::FeatureValue;
use toyota_api::RemoteCommand;
use toyota_api::Stage;
use toyota_api::Vehicle;
use toyota_api::VehicleApi;
use toyota_api::VehicleFeature;
use toyota_api::VehicleInfo;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::fleet::Fleet;
use super::session::ConfirmTiming;
use super::session::Phase;
use super::session::Session;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::LockAttributes;
use crate::engine::LockState;

/// How a lock or unlock request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    /// The vehicle reported the target on this poll (1-based).
    Confirmed { poll: u32 },
    /// Only the recovery attempt after the last poll saw the target.
    ConfirmedOnRecovery,
    TimedOut,
    /// Something failed outside the poll loop; the session was reset.
    Aborted { reason: String },
    /// Another command for this lock is still in flight.
    Busy,
    /// The vehicle is not in the latest listing.
    Unavailable,
}

impl Settled {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Settled::Confirmed { .. } | Settled::ConfirmedOnRecovery)
    }
}

#[derive(Debug, Default)]
struct LockView {
    session: Session,
    /// Last value derived from the vehicle's lockable openings.
    last_locked: Option<bool>,
}

impl LockView {
    /// Vehicle-level lock state, ignoring the session.
    ///
    /// Any locked opening makes the vehicle locked. With no lockable openings
    /// at all the last derived value is kept.
    fn observe(&mut self, vin: &str, vehicle: Option<&Vehicle>) -> bool {
        let locked = match vehicle {
            None => {
                debug!("Vehicle {} not found in coordinator data", vin);
                false
            }
            Some(vehicle) => match vehicle.features.any_locked() {
                Some(locked) => {
                    debug!(
                        "Vehicle {} lock states: {:?}, overall state: {}",
                        vin,
                        vehicle.features.lock_states().collect::<Vec<_>>(),
                        locked
                    );
                    locked
                }
                None => {
                    debug!(
                        "No lock features found for vehicle {}, using last known state: {:?}",
                        vin, self.last_locked
                    );
                    return self.last_locked.unwrap_or(false);
                }
            },
        };
        self.last_locked = Some(locked);
        locked
    }
}

/// Door lock entity for one subscribed vehicle.
pub struct ToyotaLock {
    entity_id: String,
    vin: String,
    api: Arc<dyn VehicleApi>,
    fleet: Arc<Fleet>,
    timing: ConfirmTiming,
    to_engine: FromIntegrationSender,
    view: Mutex<LockView>,
}

impl ToyotaLock {
    pub fn new(
        vin: &str,
        api: Arc<dyn VehicleApi>,
        fleet: Arc<Fleet>,
        timing: ConfirmTiming,
        to_engine: FromIntegrationSender,
    ) -> Self {
        Self {
            entity_id: format!("lock.toyota_{}", vin.to_lowercase()),
            vin: vin.to_string(),
            api,
            fleet,
            timing,
            to_engine,
            view: Mutex::new(LockView::default()),
        }
    }

    fn view(&self) -> MutexGuard<'_, LockView> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update_session(&self, f: impl FnOnce(Session) -> Session) {
        let mut view = self.view();
        view.session = f(view.session);
    }

    pub fn name(&self) -> String {
        match self.fleet.get(&self.vin).and_then(|v| v.info.nickname.clone()) {
            Some(nickname) => format!("{} Lock", nickname),
            None => format!(
                "Toyota Lock {}",
                self.vin.get(self.vin.len().saturating_sub(6)..).unwrap_or(&self.vin)
            ),
        }
    }

    /// Observable lock state: an active override, else the in-flight target,
    /// else what the vehicle reports.
    pub fn is_locked(&self) -> bool {
        let vehicle = self.fleet.get(&self.vin);
        let mut view = self.view();
        match view.session.forced(Instant::now()) {
            Some(forced) => {
                debug!("Vehicle {} using forced state: {}", self.vin, forced);
                forced
            }
            None => view.observe(&self.vin, vehicle.as_deref()),
        }
    }

    pub fn is_locking(&self) -> bool {
        self.view().session.target() == Some(true)
    }

    pub fn is_unlocking(&self) -> bool {
        self.view().session.target() == Some(false)
    }

    pub fn session(&self) -> Session {
        self.view().session
    }

    /// Vehicle-reported state with the session ignored.
    fn underlying_locked(&self) -> bool {
        let vehicle = self.fleet.get(&self.vin);
        self.view().observe(&self.vin, vehicle.as_deref())
    }

    pub fn state(&self) -> LockState {
        let vehicle = self.fleet.get(&self.vin);
        let session = self.session();
        let locked = self.is_locked();
        let target = session.target();

        let icon = match target {
            Some(true) => "mdi:lock-clock",
            Some(false) => "mdi:lock-open-variant-outline",
            None if locked => "mdi:lock",
            None => "mdi:lock-open-variant",
        };

        let last_update_timestamp = vehicle.as_ref().and_then(|v| {
            match v.features.get(VehicleFeature::LastTimeStamp) {
                Some(FeatureValue::Numeric { value, .. }) => Some(value.to_string()),
                _ => None,
            }
        });

        LockState {
            name: self.name(),
            icon: icon.to_string(),
            available: vehicle.is_some(),
            locked,
            locking: target == Some(true),
            unlocking: target == Some(false),
            attributes: LockAttributes {
                command_progress: session.progress(),
                command_type: target
                    .map(|t| if t { "locking" } else { "unlocking" }.to_string()),
                command_in_progress: target.is_some(),
                lock_state: if locked { "locked" } else { "unlocked" }.to_string(),
                last_update_timestamp,
            },
        }
    }

    pub async fn publish(&self) {
        let msg = self.state_message();
        if let Err(e) = self.to_engine.send(msg).await {
            warn!("Failed to send LockStateChanged message: {}", e);
        }
    }

    pub async fn lock(&self) -> Settled {
        self.run_command(true).await
    }

    pub async fn unlock(&self) -> Settled {
        self.run_command(false).await
    }

    /// Send a lock/unlock command and follow it until the vehicle confirms
    /// or the poll budget runs out. Never fails; the outcome is reported.
    pub async fn run_command(&self, target: bool) -> Settled {
        let command = if target {
            RemoteCommand::DoorLock
        } else {
            RemoteCommand::DoorUnlock
        };

        let Some(vehicle) = self.fleet.get(&self.vin) else {
            warn!("Vehicle {} is unavailable, ignoring {}", self.vin, command);
            return Settled::Unavailable;
        };

        {
            let mut view = self.view();
            if view.session.in_transition() {
                warn!(
                    "Vehicle {} already has a command in flight, ignoring {}",
                    self.vin, command
                );
                return Settled::Busy;
            }
            view.session = Session::begin(target, Instant::now(), &self.timing);
        }
        self.publish().await;

        info!("Starting {} command for vehicle {}", command, self.vin);

        match self.confirm(&vehicle.info, command, target).await {
            Ok(settled) => settled,
            Err(e) => {
                error!(
                    "Error sending {} command to vehicle {}: {}",
                    command, self.vin, e
                );
                self.update_session(|_| Session::Idle);
                self.publish().await;
                Settled::Aborted {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn advance(&self, phase: Phase, progress: u8) {
        self.update_session(|s| s.advance(phase, progress));
        self.publish().await;
    }

    async fn confirm(
        &self,
        info: &VehicleInfo,
        command: RemoteCommand,
        target: bool,
    ) -> toyota_api::Result<Settled> {
        // Dispatch reports its own failures; confirmation goes ahead regardless.
        info.send_command(self.api.as_ref(), command).await;
        self.advance(Phase::RefreshRequested, 30).await;

        info.poll_vehicle_refresh(self.api.as_ref()).await?;
        self.advance(Phase::Polling, 50).await;

        tokio::time::sleep(self.timing.initial_wait).await;

        let mut confirmed_at = None;
        for poll in 1..=self.timing.max_polls {
            let progress = 50 + poll.saturating_mul(10).min(50);
            self.advance(Phase::Polling, progress as u8).await;

            if self.poll_matches(info, command, target, poll).await {
                info!("Vehicle {} {} command successful", self.vin, command);
                confirmed_at = Some(poll);
                break;
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }

        self.update_session(|s| s.advance(Phase::Polling, 100));
        self.publish().await;

        let settled = match confirmed_at {
            Some(poll) => Settled::Confirmed { poll },
            None => {
                warn!(
                    "Vehicle {} {} command may not have completed successfully, forcing final update",
                    self.vin, command
                );
                self.update_session(|s| s.advance(Phase::Recovering, 100));
                match self.recover(info, command, target).await {
                    Ok(true) => {
                        info!(
                            "Vehicle {} {} command successful after final check",
                            self.vin, command
                        );
                        Settled::ConfirmedOnRecovery
                    }
                    Ok(false) => Settled::TimedOut,
                    Err(e) => {
                        error!("Final update failed after {}: {}", command, e);
                        Settled::TimedOut
                    }
                }
            }
        };

        self.update_session(|s| s.settle(settled.is_confirmed(), Instant::now(), &self.timing));
        self.publish().await;
        Ok(settled)
    }

    async fn recover(
        &self,
        info: &VehicleInfo,
        command: RemoteCommand,
        target: bool,
    ) -> toyota_api::Result<bool> {
        info.poll_vehicle_refresh(self.api.as_ref()).await?;
        tokio::time::sleep(self.timing.recovery_wait).await;
        let poll = self.timing.max_polls.saturating_add(1);
        Ok(self.poll_matches(info, command, target, poll).await)
    }

    /// Fetch fresh data into the fleet and compare the vehicle-reported
    /// state against `target`. A failed status fetch never matches.
    async fn poll_matches(
        &self,
        info: &VehicleInfo,
        command: RemoteCommand,
        target: bool,
        poll: u32,
    ) -> bool {
        let (fresh, report) = fetch_features(self.api.as_ref(), info).await;
        if !self.fleet.merge_features(&info.vin, fresh) {
            debug!("Poll {}: vehicle {} left the fleet", poll, info.vin);
            return false;
        }

        if let Some(failure) = report
            .failed
            .iter()
            .find(|f| f.stage == Stage::VehicleStatus)
        {
            debug!("Poll {} failed during {}: {}", poll, command, failure.message);
            return false;
        }

        let current = self.underlying_locked();
        debug!(
            "Poll {}: Current state: {}, Expected: {}",
            poll, current, target
        );
        current == target
    }
}

impl Entity for ToyotaLock {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> &'static str {
        "lock"
    }

    fn state_message(&self) -> FromIntegrationMessage {
        FromIntegrationMessage::LockStateChanged {
            entity_id: self.entity_id.clone(),
            state: self.state(),
        }
    }
}
