use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};

use crate::controller::{ControlEvent, ControllerStatus, FlightModeController, OperatorCommand};
use crate::pose_table::PoseTable;
use crate::types::{BatteryState, FlightMode};

/// Status is republished on every event and at least this often (ticks).
const STATUS_EVERY_TICKS: u64 = 50;

#[derive(Clone, Debug, Default, Serialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub mode_changes: u64,
    pub safety_trips: u64,
    pub grips_learned: u64,
    pub grips_matched: u64,
    pub grips_lost: u64,
    pub save_failures: u64,
    pub commands: u64,
}

impl LoopStats {
    fn record(&mut self, events: &[ControlEvent]) {
        for event in events {
            match event {
                ControlEvent::ModeChanged { .. } => self.mode_changes += 1,
                ControlEvent::SafetyTrip { .. } => self.safety_trips += 1,
                ControlEvent::GripLearned { .. } => self.grips_learned += 1,
                ControlEvent::GripMatched { .. } => self.grips_matched += 1,
                ControlEvent::GripLost { .. } => self.grips_lost += 1,
                ControlEvent::CatalogSaveFailed { .. } => self.save_failures += 1,
                ControlEvent::CommandIgnored { .. } => {}
            }
        }
    }
}

/// Single control-loop worker.
///
/// Polls the pose table at the profile's tick interval. Operator commands
/// and battery telemetry are drained before each tick; cancellation is the
/// shared `flying_enabled` flag, checked once per iteration.
pub struct ControlLoop {
    controller: FlightModeController,
    poses: Arc<PoseTable>,
    commands: mpsc::Receiver<OperatorCommand>,
    battery: watch::Receiver<Option<BatteryState>>,
    status: watch::Sender<ControllerStatus>,
    flying_enabled: Arc<AtomicBool>,
    stats: LoopStats,
}

impl ControlLoop {
    pub fn new(
        controller: FlightModeController,
        poses: Arc<PoseTable>,
        commands: mpsc::Receiver<OperatorCommand>,
        battery: watch::Receiver<Option<BatteryState>>,
        status: watch::Sender<ControllerStatus>,
        flying_enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            controller,
            poses,
            commands,
            battery,
            status,
            flying_enabled,
            stats: LoopStats::default(),
        }
    }

    pub fn controller(&self) -> &FlightModeController {
        &self.controller
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// One iteration: commands, battery, tick, status.
    pub fn step(&mut self) -> Vec<ControlEvent> {
        let mut events = Vec::new();

        while let Ok(command) = self.commands.try_recv() {
            log::info!("Operator command: {:?}", command);
            self.stats.commands += 1;
            events.extend(self.controller.command(command));
        }

        if self.battery.has_changed().unwrap_or(false) {
            if let Some(state) = *self.battery.borrow_and_update() {
                self.controller.set_battery(state);
            }
        }

        let snapshot = self.poses.snapshot();
        events.extend(self.controller.tick(&snapshot));

        self.stats.ticks += 1;
        self.stats.record(&events);
        if !events.is_empty() || self.stats.ticks % STATUS_EVERY_TICKS == 0 {
            self.status.send_replace(self.controller.status());
        }

        events
    }

    /// Run until `flying_enabled` is cleared. A vehicle still in the air
    /// when the loop exits is killed.
    pub async fn run(mut self) -> (FlightModeController, LoopStats) {
        let interval = Duration::from_millis(self.controller.profile().tick_interval_ms);
        log::info!("Control loop running every {:?}", interval);

        while self.flying_enabled.load(Ordering::Relaxed) {
            for event in self.step() {
                log::debug!("{:?}", event);
            }
            sleep(interval).await;
        }

        if self.controller.mode() != FlightMode::Disconnected {
            log::warn!("Control loop stopping in {:?}, killing vehicle", self.controller.mode());
            let events = self.controller.command(OperatorCommand::Kill);
            self.stats.record(&events);
        }
        self.status.send_replace(self.controller.status());

        log::info!("Control loop stopped after {} ticks", self.stats.ticks);
        (self.controller, self.stats)
    }
}
