// controller.rs — Flight-mode state machine
//
// Owns the mode, the goal and every per-mode counter. One call to `tick`
// per control-loop iteration: connection gating, safety monitors, then the
// setpoint for the active mode. Mode entry bookkeeping runs synchronously
// inside `switch_mode`, so a tick never sees a half-initialised mode.

use serde::Serialize;

use crate::config::RigProfile;
use crate::dispatcher::{DispatchOutcome, SetpointDispatcher};
use crate::gesture::{CalibratedOffset, GestureCalibrator, TrainingState};
use crate::pose_fusion::{distance, fuse_midpoint, wand_target};
use crate::pose_table::PoseSnapshot;
use crate::safety::{SafetyAction, SafetyInput, SafetyMonitor, TripCause};
use crate::types::{BatteryState, BodyId, FlightMode, GoalPosition, Point3, PoseSample};

/// Discrete operator triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorCommand {
    Lift,
    Land,
    ToggleFollow,
    Kill,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ControlEvent {
    ModeChanged { from: FlightMode, to: FlightMode },
    SafetyTrip { cause: TripCause, action: SafetyAction },
    CommandIgnored { command: OperatorCommand, mode: FlightMode },
    GripMatched { name: String },
    GripLearned { name: String },
    GripLost { name: String },
    CatalogSaveFailed { error: String },
}

/// Informational snapshot for status egress.
#[derive(Clone, Debug, Serialize)]
pub struct ControllerStatus {
    pub mode: FlightMode,
    pub status: String,
    pub reason: Option<String>,
    pub ticks: u64,
    pub frames_without_tracking: u32,
    pub goal: GoalPosition,
    pub active_grip: Option<String>,
    pub training_progress: f64,
    pub catalog_size: usize,
    pub setpoints_sent: u64,
    pub stops_sent: u64,
    pub battery: Option<BatteryState>,
}

pub struct FlightModeController {
    profile: RigProfile,
    mode: FlightMode,
    /// Mode whose entry bookkeeping last completed.
    entered: FlightMode,
    reason: Option<String>,

    goal: GoalPosition,
    baseline: PoseSample,
    last_valid_vehicle: PoseSample,
    last_snapshot: Option<PoseSnapshot>,

    lift_rate: f64,
    land_rate: f64,
    spin: f64,

    active_grip: Option<CalibratedOffset>,
    battery: Option<BatteryState>,
    launch_requested: bool,
    ticks: u64,

    calibrator: GestureCalibrator,
    safety: SafetyMonitor,
    dispatcher: SetpointDispatcher,
}

impl FlightModeController {
    pub fn new(profile: RigProfile, calibrator: GestureCalibrator, dispatcher: SetpointDispatcher) -> Self {
        let safety = SafetyMonitor::new(&profile);
        Self {
            lift_rate: profile.lift_rate_start,
            profile,
            mode: FlightMode::Disconnected,
            entered: FlightMode::Disconnected,
            reason: None,
            goal: GoalPosition::default(),
            baseline: PoseSample::at(0.0, 0.0, 0.0),
            last_valid_vehicle: PoseSample::at(0.0, 0.0, 0.0),
            last_snapshot: None,
            land_rate: 1.0,
            spin: 0.0,
            active_grip: None,
            battery: None,
            launch_requested: false,
            ticks: 0,
            calibrator,
            safety,
            dispatcher,
        }
    }

    pub fn mode(&self) -> FlightMode {
        self.mode
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn goal(&self) -> GoalPosition {
        self.goal
    }

    pub fn active_grip(&self) -> Option<&CalibratedOffset> {
        self.active_grip.as_ref()
    }

    pub fn calibrator(&self) -> &GestureCalibrator {
        &self.calibrator
    }

    pub fn dispatcher(&self) -> &SetpointDispatcher {
        &self.dispatcher
    }

    pub fn profile(&self) -> &RigProfile {
        &self.profile
    }

    pub fn set_battery(&mut self, state: BatteryState) {
        if self.battery != Some(state) {
            log::info!("Battery state: {:?}", state);
        }
        self.battery = Some(state);
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            mode: self.mode,
            status: self.mode.label().to_string(),
            reason: self.reason.clone(),
            ticks: self.ticks,
            frames_without_tracking: self.safety.frames_without_tracking(),
            goal: self.goal,
            active_grip: self.active_grip.as_ref().map(|g| g.name.clone()),
            training_progress: self.calibrator.progress(),
            catalog_size: self.calibrator.catalog().len(),
            setpoints_sent: self.dispatcher.setpoints_sent(),
            stops_sent: self.dispatcher.stops_sent(),
            battery: self.battery,
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────

    fn switch_mode(&mut self, to: FlightMode, events: &mut Vec<ControlEvent>) {
        let from = self.mode;
        self.mode = to;
        self.on_enter(to);
        log::info!("Switching Flight Mode to: {:?} (from {:?})", to, from);
        events.push(ControlEvent::ModeChanged { from, to });
    }

    fn on_enter(&mut self, mode: FlightMode) {
        self.baseline = self.last_valid_vehicle;
        self.goal = GoalPosition::new(self.baseline.x, self.baseline.y, self.baseline.z, self.spin);

        match mode {
            FlightMode::Disconnected => {
                self.active_grip = None;
                self.launch_requested = false;
                self.calibrator.reset();
                self.safety.reset();
            }
            FlightMode::Grounded => {
                self.active_grip = None;
                self.calibrator.reset();
                self.spin = 0.0;
            }
            FlightMode::Lift => {
                self.lift_rate = self.profile.lift_rate_start;
                self.reason = None;
                log::info!("Trying to lift at: {:?}", self.baseline.position());
            }
            FlightMode::Hovering => {
                self.active_grip = None;
                self.calibrator.reset();
                log::info!("Hovering at: {:?}", self.baseline.position());
            }
            FlightMode::Follow => {
                log::info!(
                    "Entering follow mode ({})",
                    self.active_grip.as_ref().map(|g| g.name.as_str()).unwrap_or("free")
                );
            }
            FlightMode::Land => {
                self.land_rate = 1.0;
                self.active_grip = None;
                log::info!("Trying to land at: x: {} y: {}", self.baseline.x, self.baseline.y);
            }
        }

        self.entered = mode;
    }

    /// Dispatch a goal; a floor-height goal forces GROUNDED.
    pub fn send_setpoint(&mut self, goal: GoalPosition) -> Vec<ControlEvent> {
        let mut events = Vec::new();
        self.dispatch(goal, &mut events);
        events
    }

    fn dispatch(&mut self, goal: GoalPosition, events: &mut Vec<ControlEvent>) -> DispatchOutcome {
        self.goal = goal;
        let outcome = self.dispatcher.send(&goal);
        if outcome == DispatchOutcome::Grounded
            && !matches!(self.mode, FlightMode::Disconnected | FlightMode::Grounded)
        {
            self.switch_mode(FlightMode::Grounded, events);
        }
        outcome
    }

    fn kill(&mut self, reason: &str, events: &mut Vec<ControlEvent>) {
        self.dispatcher.kill();
        self.reason = Some(reason.to_string());
        if self.mode != FlightMode::Disconnected {
            self.switch_mode(FlightMode::Disconnected, events);
        }
    }

    // ── Operator commands ────────────────────────────────────────────────

    pub fn command(&mut self, command: OperatorCommand) -> Vec<ControlEvent> {
        let mut events = Vec::new();
        let mode = self.mode;

        match (command, mode) {
            (OperatorCommand::Lift, FlightMode::Grounded) => {
                // Checked against the launch interlocks on the next tick
                self.launch_requested = true;
            }
            (OperatorCommand::Land, m) if m.is_airborne() && m != FlightMode::Land => {
                self.switch_mode(FlightMode::Land, &mut events);
            }
            (OperatorCommand::ToggleFollow, FlightMode::Follow) => {
                self.switch_mode(FlightMode::Hovering, &mut events);
            }
            (OperatorCommand::ToggleFollow, FlightMode::Hovering) => {
                if let Some(grip) = self.grip_for_last_snapshot() {
                    events.push(ControlEvent::GripMatched { name: grip.name.clone() });
                    self.active_grip = Some(grip);
                    self.switch_mode(FlightMode::Follow, &mut events);
                } else if !self.profile.require_grip {
                    self.switch_mode(FlightMode::Follow, &mut events);
                } else {
                    events.push(ControlEvent::CommandIgnored { command, mode });
                }
            }
            (OperatorCommand::Kill, _) => {
                self.kill("Killed by operator", &mut events);
            }
            _ => {
                log::debug!("Ignoring {:?} in {:?}", command, mode);
                events.push(ControlEvent::CommandIgnored { command, mode });
            }
        }

        events
    }

    fn grip_for_last_snapshot(&self) -> Option<CalibratedOffset> {
        let snap = self.last_snapshot?;
        self.calibrator
            .match_grip(&snap.left(), &snap.right(), &snap.vehicle(), self.profile.match_leeway)
            .cloned()
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    pub fn tick(&mut self, snap: &PoseSnapshot) -> Vec<ControlEvent> {
        let mut events = Vec::new();
        self.ticks += 1;
        self.last_snapshot = Some(*snap);
        debug_assert_eq!(self.entered, self.mode, "mode evaluated before entry completed");

        if !self.gate_connection(snap, &mut events) {
            return events;
        }

        let vehicle = snap.vehicle();
        self.safety.observe_vehicle(&vehicle);
        if vehicle.is_valid() {
            self.last_valid_vehicle = vehicle;
        }

        self.run_safety(&vehicle, &mut events);

        if self.launch_requested && self.mode == FlightMode::Grounded {
            self.launch_requested = false;
            self.switch_mode(FlightMode::Lift, &mut events);
        }

        match self.mode {
            FlightMode::Disconnected => {}
            FlightMode::Grounded => self.tick_grounded(snap, &mut events),
            FlightMode::Lift => self.tick_lift(&mut events),
            FlightMode::Hovering => self.tick_hovering(snap, &mut events),
            FlightMode::Follow => self.tick_follow(snap, &mut events),
            FlightMode::Land => self.tick_land(snap, &mut events),
        }

        events
    }

    /// Returns false when there is nothing more to do this tick.
    fn gate_connection(&mut self, snap: &PoseSnapshot, events: &mut Vec<ControlEvent>) -> bool {
        if !self.dispatcher.has_link() || !snap.is_present(BodyId::Vehicle) {
            if self.mode != FlightMode::Disconnected {
                log::warn!("Vehicle link lost in {:?}", self.mode);
                self.reason = Some("Vehicle link lost".to_string());
                self.switch_mode(FlightMode::Disconnected, events);
            }
            return false;
        }

        match self.mode {
            FlightMode::Disconnected => {
                if snap.all_present() {
                    self.switch_mode(FlightMode::Grounded, events);
                    return true;
                }
                false
            }
            FlightMode::Grounded if !snap.all_present() => {
                log::warn!("Wand stream lost while grounded");
                self.reason = Some("Wand stream lost".to_string());
                self.switch_mode(FlightMode::Disconnected, events);
                false
            }
            _ => true,
        }
    }

    fn run_safety(&mut self, vehicle: &PoseSample, events: &mut Vec<ControlEvent>) {
        let input = SafetyInput {
            mode: self.mode,
            vehicle: *vehicle,
            last_valid_vehicle: self.last_valid_vehicle,
            battery: self.battery,
            launch_requested: self.launch_requested,
        };
        let Some(trip) = self.safety.check(&input) else {
            return;
        };

        let reason = trip.cause.reason();
        log::warn!("Safety trip in {:?}: {} -> {:?}", self.mode, reason, trip.action);
        events.push(ControlEvent::SafetyTrip { cause: trip.cause, action: trip.action });

        match trip.action {
            SafetyAction::RefuseLaunch => {
                self.launch_requested = false;
                self.reason = Some(reason.to_string());
            }
            SafetyAction::Land => {
                self.reason = Some(reason.to_string());
                if self.mode != FlightMode::Land {
                    self.switch_mode(FlightMode::Land, events);
                }
            }
            SafetyAction::Disconnect => self.kill(reason, events),
        }
    }

    fn tick_grounded(&mut self, snap: &PoseSnapshot, events: &mut Vec<ControlEvent>) {
        if !self.profile.train_while_grounded {
            return;
        }
        // A learned grip here is only stored; follow needs the vehicle airborne
        let _ = self.train_or_match(snap, events);
    }

    fn tick_lift(&mut self, events: &mut Vec<ControlEvent>) {
        let height = self.profile.lift_height;
        let target = GoalPosition::new(self.baseline.x, self.baseline.y, height / self.lift_rate, self.spin);
        if self.dispatch(target, events) != DispatchOutcome::Sent {
            return;
        }

        self.lift_rate = (self.lift_rate - self.profile.lift_rate_step).max(1.0);
        if self.lift_rate <= 1.0 {
            let settle = Point3::new(self.baseline.x, self.baseline.y, height);
            if self.last_valid_vehicle.distance_to(&settle) < self.profile.lift_settle_threshold {
                self.switch_mode(FlightMode::Hovering, events);
            }
        }
    }

    fn tick_hovering(&mut self, snap: &PoseSnapshot, events: &mut Vec<ControlEvent>) {
        // Spin slows while a grip is being learned, full rate when idle
        let damping = 1.0 - self.calibrator.progress();
        self.spin = wrap_degrees(self.spin + self.profile.hover_spin_rate * damping);

        let hold = GoalPosition::new(self.baseline.x, self.baseline.y, self.baseline.z, self.spin);
        if self.dispatch(hold, events) != DispatchOutcome::Sent {
            return;
        }

        if let Some(grip) = self.train_or_match(snap, events) {
            self.active_grip = Some(grip);
            self.switch_mode(FlightMode::Follow, events);
        }
    }

    /// Look for a known grip first; otherwise keep training.
    /// Returns a grip to lock onto, matched or freshly learned.
    fn train_or_match(&mut self, snap: &PoseSnapshot, events: &mut Vec<ControlEvent>) -> Option<CalibratedOffset> {
        let (left, right, vehicle) = (snap.left(), snap.right(), snap.vehicle());

        if let Some(grip) = self
            .calibrator
            .match_grip(&left, &right, &vehicle, self.profile.match_leeway)
            .cloned()
        {
            self.calibrator.reset();
            if self.mode == FlightMode::Hovering {
                events.push(ControlEvent::GripMatched { name: grip.name.clone() });
            }
            return Some(grip);
        }

        match self.calibrator.observe(&left, &right, &vehicle) {
            TrainingState::Converged => {
                let promotion = self.calibrator.promote();
                if let Some(err) = promotion.save_error {
                    events.push(ControlEvent::CatalogSaveFailed { error: err.to_string() });
                }
                events.push(ControlEvent::GripLearned { name: promotion.offset.name.clone() });
                Some(promotion.offset)
            }
            TrainingState::Training | TrainingState::Abandoned => None,
        }
    }

    fn tick_follow(&mut self, snap: &PoseSnapshot, events: &mut Vec<ControlEvent>) {
        let (left, right) = (snap.left(), snap.right());
        let vehicle = self.last_valid_vehicle;
        let wands_valid = left.is_valid() && right.is_valid();

        let target = match self.active_grip.clone() {
            Some(grip) => {
                let (err_l, err_r) = grip.hand_errors(&left, &right, &vehicle);
                let leeway = self.profile.follow_leeway;
                if !wands_valid || (err_l >= leeway && err_r >= leeway) {
                    log::info!("Grip {} released (errors {:.3} / {:.3})", grip.name, err_l, err_r);
                    events.push(ControlEvent::GripLost { name: grip.name });
                    self.switch_mode(FlightMode::Hovering, events);
                    return;
                }
                let (from_l, from_r) = grip.implied_vehicle(&left, &right);
                Some(fuse_midpoint(&from_l, &from_r))
            }
            None if wands_valid => {
                let mut tip = wand_target(&left, &right, self.profile.wand_length);
                tip.z -= self.profile.free_follow_drop;
                Some(tip)
            }
            None => None,
        };

        let here = vehicle.position();
        let next = match target {
            Some(t) => {
                let step = distance(&here, &t);
                if step < self.profile.step_leeway_min {
                    t
                } else if step > self.profile.step_leeway_max {
                    log::debug!("Follow target {:.2} m away, holding", step);
                    here
                } else {
                    self.goal.position()
                }
            }
            None => here,
        };

        let goal = self.dispatcher.clamp(&GoalPosition::from_point(&next, self.spin));
        self.dispatch(goal, events);
    }

    fn tick_land(&mut self, snap: &PoseSnapshot, events: &mut Vec<ControlEvent>) {
        if !snap.vehicle().is_valid() {
            return;
        }

        self.spin = wrap_degrees(self.spin + self.profile.land_spin_rate);
        let target = Point3::new(self.baseline.x, self.baseline.y, self.baseline.z / self.land_rate);
        let goal = GoalPosition::from_point(&target, self.spin);
        if self.dispatch(goal, events) != DispatchOutcome::Sent {
            return;
        }

        if self.last_valid_vehicle.distance_to(&target) < self.profile.path_tolerance {
            self.land_rate *= self.profile.land_rate_growth;
        }
    }
}

fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TripPolicy;
    use crate::dispatcher::tests::{LinkCall, RecordingLink};
    use crate::gesture::Catalog;

    fn controller(profile: RigProfile, link: &RecordingLink) -> FlightModeController {
        let calibrator = GestureCalibrator::new(Catalog::in_memory(), &profile);
        let dispatcher = SetpointDispatcher::new(
            Some(Box::new(link.clone())),
            profile.floor_height,
            profile.envelope.clone(),
        );
        FlightModeController::new(profile, calibrator, dispatcher)
    }

    fn snapshot(vehicle: PoseSample, left: PoseSample, right: PoseSample) -> PoseSnapshot {
        let mut samples = [PoseSample::lost(); BodyId::COUNT];
        samples[BodyId::Vehicle.index()] = vehicle;
        samples[BodyId::LeftWand.index()] = left;
        samples[BodyId::RightWand.index()] = right;
        PoseSnapshot { samples, present: [true; BodyId::COUNT] }
    }

    fn on_ground() -> PoseSnapshot {
        snapshot(PoseSample::at(0.0, 0.0, 0.0), PoseSample::lost(), PoseSample::lost())
    }

    fn modes_entered(events: &[ControlEvent]) -> Vec<FlightMode> {
        events
            .iter()
            .filter_map(|e| match e {
                ControlEvent::ModeChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    fn quiet_profile() -> RigProfile {
        RigProfile { hover_spin_rate: 0.0, ..RigProfile::default() }
    }

    #[test]
    fn test_connects_once_every_stream_reports() {
        let link = RecordingLink::new();
        let mut ctl = controller(quiet_profile(), &link);

        let mut partial = on_ground();
        partial.present[BodyId::RightWand.index()] = false;
        ctl.tick(&partial);
        assert_eq!(ctl.mode(), FlightMode::Disconnected);

        // Invalid wand samples still count as a reporting stream
        let events = ctl.tick(&on_ground());
        assert_eq!(modes_entered(&events), vec![FlightMode::Grounded]);
    }

    #[test]
    fn test_grounded_drops_to_disconnected_on_stream_loss() {
        let link = RecordingLink::new();
        let mut ctl = controller(quiet_profile(), &link);
        ctl.tick(&on_ground());

        let mut partial = on_ground();
        partial.present[BodyId::LeftWand.index()] = false;
        ctl.tick(&partial);
        assert_eq!(ctl.mode(), FlightMode::Disconnected);
        assert_eq!(ctl.reason(), Some("Wand stream lost"));
    }

    /// Vehicle that sits exactly where it was last told to go.
    fn follow_setpoints(link: &RecordingLink, fallback: PoseSample) -> PoseSample {
        match link.last() {
            Some(LinkCall::Position(x, y, z, _)) => PoseSample::at(x, y, z),
            _ => fallback,
        }
    }

    #[test]
    fn test_lift_reaches_hover_exactly_once() {
        let link = RecordingLink::new();
        let mut ctl = controller(quiet_profile(), &link);
        ctl.tick(&on_ground());
        ctl.command(OperatorCommand::Lift);

        let mut entered = Vec::new();
        let mut vehicle = PoseSample::at(0.0, 0.0, 0.0);
        for _ in 0..1000 {
            let events = ctl.tick(&snapshot(vehicle, PoseSample::lost(), PoseSample::lost()));
            entered.extend(modes_entered(&events));
            vehicle = follow_setpoints(&link, vehicle);
        }

        assert_eq!(entered, vec![FlightMode::Lift, FlightMode::Hovering]);
        assert_eq!(ctl.mode(), FlightMode::Hovering);
        assert!((ctl.goal().z - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_lift_refused_on_charger() {
        let link = RecordingLink::new();
        let mut ctl = controller(quiet_profile(), &link);
        ctl.set_battery(BatteryState::Charging);
        ctl.tick(&on_ground());
        ctl.command(OperatorCommand::Lift);

        let events = ctl.tick(&on_ground());
        assert_eq!(ctl.mode(), FlightMode::Grounded);
        assert!(events.contains(&ControlEvent::SafetyTrip {
            cause: TripCause::OnCharger,
            action: SafetyAction::RefuseLaunch
        }));
        assert!(ctl.reason().unwrap().contains("charger"));

        // Refusal consumed the request
        ctl.tick(&on_ground());
        assert_eq!(ctl.mode(), FlightMode::Grounded);
    }

    #[test]
    fn test_lift_refused_while_vehicle_never_tracked() {
        let link = RecordingLink::new();
        let mut ctl = controller(quiet_profile(), &link);
        let untracked = snapshot(PoseSample::lost(), PoseSample::lost(), PoseSample::lost());
        ctl.tick(&untracked);
        assert_eq!(ctl.mode(), FlightMode::Grounded);

        ctl.command(OperatorCommand::Lift);
        let events = ctl.tick(&untracked);
        assert_eq!(ctl.mode(), FlightMode::Grounded);
        assert!(events.contains(&ControlEvent::SafetyTrip {
            cause: TripCause::Untracked,
            action: SafetyAction::RefuseLaunch
        }));
        assert!(!link.calls().iter().any(|c| matches!(c, LinkCall::Position(..))));
    }

    #[test]
    fn test_lift_refused_after_tracking_lost_on_ground() {
        let link = RecordingLink::new();
        let mut ctl = controller(quiet_profile(), &link);
        ctl.tick(&on_ground());

        ctl.command(OperatorCommand::Lift);
        ctl.tick(&snapshot(PoseSample::lost(), PoseSample::lost(), PoseSample::lost()));
        assert_eq!(ctl.mode(), FlightMode::Grounded);
        assert!(ctl.reason().unwrap().contains("not tracked"));
    }

    fn hovering(profile: RigProfile, link: &RecordingLink) -> FlightModeController {
        let mut ctl = controller(profile, link);
        let mut events = Vec::new();
        ctl.tick(&snapshot(PoseSample::at(0.0, 0.0, 1.0), PoseSample::lost(), PoseSample::lost()));
        ctl.switch_mode(FlightMode::Hovering, &mut events);
        ctl
    }

    #[test]
    fn test_flip_and_low_power_lands_with_flip_reason() {
        let link = RecordingLink::new();
        let profile = RigProfile { require_grip: false, ..quiet_profile() };
        let mut ctl = hovering(profile, &link);
        let level = snapshot(
            PoseSample::at(0.0, 0.0, 1.0),
            PoseSample::at(-0.2, 0.0, 1.2),
            PoseSample::at(0.2, 0.0, 1.2),
        );
        ctl.tick(&level);
        ctl.command(OperatorCommand::ToggleFollow);
        assert_eq!(ctl.mode(), FlightMode::Follow);

        ctl.set_battery(BatteryState::LowPower);
        let mut flipped = level;
        flipped.samples[BodyId::Vehicle.index()] = PoseSample::new(0.0, 0.0, 1.0, 170.0, 0.0, 0.0);
        let events = ctl.tick(&flipped);

        assert_eq!(ctl.mode(), FlightMode::Land);
        assert_eq!(ctl.reason(), Some("Upside down"));
        assert!(events.contains(&ControlEvent::SafetyTrip {
            cause: TripCause::UpsideDown,
            action: SafetyAction::Land
        }));
    }

    #[test]
    fn test_floor_setpoint_grounds_from_any_connected_mode() {
        for mode in [
            FlightMode::Grounded,
            FlightMode::Lift,
            FlightMode::Hovering,
            FlightMode::Follow,
            FlightMode::Land,
        ] {
            let link = RecordingLink::new();
            let mut ctl = controller(quiet_profile(), &link);
            ctl.tick(&on_ground());
            let mut events = Vec::new();
            if mode != FlightMode::Grounded {
                ctl.switch_mode(mode, &mut events);
            }

            ctl.send_setpoint(GoalPosition::new(0.0, 0.0, 0.0, 0.0));
            assert_eq!(ctl.mode(), FlightMode::Grounded, "from {:?}", mode);
            assert_eq!(link.last(), Some(LinkCall::Stop));
        }
    }

    #[test]
    fn test_floor_setpoint_keeps_disconnected() {
        let link = RecordingLink::new();
        let mut ctl = controller(quiet_profile(), &link);
        ctl.send_setpoint(GoalPosition::new(0.0, 0.0, 0.0, 0.0));
        assert_eq!(ctl.mode(), FlightMode::Disconnected);
    }

    #[test]
    fn test_land_ramps_down_to_grounded() {
        let link = RecordingLink::new();
        let mut ctl = hovering(quiet_profile(), &link);
        ctl.command(OperatorCommand::Land);
        assert_eq!(ctl.mode(), FlightMode::Land);

        let mut vehicle = PoseSample::at(0.0, 0.0, 1.0);
        let mut heights = Vec::new();
        for _ in 0..500 {
            ctl.tick(&snapshot(vehicle, PoseSample::lost(), PoseSample::lost()));
            if ctl.mode() != FlightMode::Land {
                break;
            }
            heights.push(ctl.goal().z);
            vehicle = follow_setpoints(&link, vehicle);
        }

        assert_eq!(ctl.mode(), FlightMode::Grounded);
        assert_eq!(link.last(), Some(LinkCall::Stop));
        assert!(heights.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_land_waits_while_vehicle_untracked() {
        let link = RecordingLink::new();
        let mut ctl = hovering(quiet_profile(), &link);
        ctl.command(OperatorCommand::Land);
        let before = link.calls().len();
        ctl.tick(&snapshot(PoseSample::lost(), PoseSample::lost(), PoseSample::lost()));
        assert_eq!(link.calls().len(), before);
        assert_eq!(ctl.mode(), FlightMode::Land);
    }

    #[test]
    fn test_tracking_loss_disconnects_by_default() {
        let link = RecordingLink::new();
        let profile = RigProfile { lost_tracking_frames: 3, ..quiet_profile() };
        let mut ctl = hovering(profile, &link);

        for _ in 0..4 {
            ctl.tick(&snapshot(PoseSample::lost(), PoseSample::lost(), PoseSample::lost()));
        }
        assert_eq!(ctl.mode(), FlightMode::Disconnected);
        assert_eq!(ctl.reason(), Some("Tracking lost"));
        assert!(link.calls().contains(&LinkCall::Disconnect));
    }

    #[test]
    fn test_tracking_loss_can_land_instead() {
        let link = RecordingLink::new();
        let profile = RigProfile {
            lost_tracking_frames: 3,
            tracking_loss_policy: TripPolicy::Land,
            ..quiet_profile()
        };
        let mut ctl = hovering(profile, &link);
        for _ in 0..4 {
            ctl.tick(&snapshot(PoseSample::lost(), PoseSample::lost(), PoseSample::lost()));
        }
        assert_eq!(ctl.mode(), FlightMode::Land);
    }

    #[test]
    fn test_kill_disconnects_and_stays_down() {
        let link = RecordingLink::new();
        let mut ctl = hovering(quiet_profile(), &link);
        ctl.command(OperatorCommand::Kill);
        assert_eq!(ctl.mode(), FlightMode::Disconnected);
        assert_eq!(link.calls()[link.calls().len() - 2..], [LinkCall::Stop, LinkCall::Disconnect]);

        ctl.tick(&on_ground());
        assert_eq!(ctl.mode(), FlightMode::Disconnected);
    }

    fn grip_hands(vehicle: &PoseSample) -> (PoseSample, PoseSample) {
        (
            PoseSample::at(vehicle.x - 0.3, vehicle.y, vehicle.z - 0.2),
            PoseSample::at(vehicle.x + 0.3, vehicle.y, vehicle.z - 0.2),
        )
    }

    #[test]
    fn test_hover_learns_grip_then_follows() {
        let link = RecordingLink::new();
        let profile = RigProfile { min_window: 20, ..quiet_profile() };
        let mut ctl = hovering(profile, &link);
        let vehicle = PoseSample::at(0.0, 0.0, 1.0);
        let (l, r) = grip_hands(&vehicle);

        let mut learned = None;
        for _ in 0..30 {
            for e in ctl.tick(&snapshot(vehicle, l, r)) {
                if let ControlEvent::GripLearned { name } = e {
                    learned = Some(name);
                }
            }
            if ctl.mode() == FlightMode::Follow {
                break;
            }
        }

        assert!(learned.is_some());
        assert_eq!(ctl.mode(), FlightMode::Follow);
        assert_eq!(ctl.calibrator().catalog().len(), 1);
        assert_eq!(ctl.active_grip().map(|g| g.name.clone()), learned);
    }

    #[test]
    fn test_unwritable_catalog_still_follows() {
        let blocker = std::env::temp_dir().join("wand_flight_controller_blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let link = RecordingLink::new();
        let profile = RigProfile { min_window: 20, ..quiet_profile() };
        let calibrator = GestureCalibrator::new(Catalog::load(&blocker.join("grips.json")), &profile);
        let dispatcher = SetpointDispatcher::new(Some(Box::new(link.clone())), profile.floor_height, profile.envelope.clone());
        let mut ctl = FlightModeController::new(profile, calibrator, dispatcher);

        let vehicle = PoseSample::at(0.0, 0.0, 1.0);
        ctl.tick(&snapshot(vehicle, PoseSample::lost(), PoseSample::lost()));
        let mut events = Vec::new();
        ctl.switch_mode(FlightMode::Hovering, &mut events);

        let (l, r) = grip_hands(&vehicle);
        let mut all = Vec::new();
        for _ in 0..30 {
            all.extend(ctl.tick(&snapshot(vehicle, l, r)));
            if ctl.mode() == FlightMode::Follow {
                break;
            }
        }

        assert!(all.iter().any(|e| matches!(e, ControlEvent::CatalogSaveFailed { .. })));
        assert!(all.iter().any(|e| matches!(e, ControlEvent::GripLearned { .. })));
        assert_eq!(ctl.mode(), FlightMode::Follow);
        assert_eq!(ctl.calibrator().catalog().len(), 1);

        std::fs::remove_file(&blocker).unwrap();
    }

    #[test]
    fn test_known_grip_reengages_and_releases() {
        let link = RecordingLink::new();
        let profile = quiet_profile();
        let mut catalog = Catalog::in_memory();
        catalog
            .append(CalibratedOffset::from_values("A".to_string(), [0.3, 0.0, 0.2, -0.3, 0.0, 0.2]))
            .unwrap();
        let calibrator = GestureCalibrator::new(catalog, &profile);
        let dispatcher = SetpointDispatcher::new(Some(Box::new(link.clone())), profile.floor_height, profile.envelope.clone());
        let mut ctl = FlightModeController::new(profile, calibrator, dispatcher);

        let vehicle = PoseSample::at(0.0, 0.0, 1.0);
        ctl.tick(&snapshot(vehicle, PoseSample::lost(), PoseSample::lost()));
        let mut events = Vec::new();
        ctl.switch_mode(FlightMode::Hovering, &mut events);

        let (l, r) = grip_hands(&vehicle);
        let events = ctl.tick(&snapshot(vehicle, l, r));
        assert!(events.contains(&ControlEvent::GripMatched { name: "A".to_string() }));
        assert_eq!(ctl.mode(), FlightMode::Follow);

        // Hands drift a little: vehicle target follows the implied position
        let nudged_l = PoseSample::at(l.x + 0.05, l.y, l.z);
        let nudged_r = PoseSample::at(r.x + 0.05, r.y, r.z);
        ctl.tick(&snapshot(vehicle, nudged_l, nudged_r));
        assert_eq!(ctl.mode(), FlightMode::Follow);
        assert!((ctl.goal().x - 0.05).abs() < 1e-9);

        // One wand lost: back to hover and training resumes
        let events = ctl.tick(&snapshot(vehicle, PoseSample::lost(), nudged_r));
        assert!(events.contains(&ControlEvent::GripLost { name: "A".to_string() }));
        assert_eq!(ctl.mode(), FlightMode::Hovering);
        assert!(ctl.active_grip().is_none());
    }

    #[test]
    fn test_follow_toggle_needs_grip_when_required() {
        let link = RecordingLink::new();
        let mut ctl = hovering(quiet_profile(), &link);
        let events = ctl.command(OperatorCommand::ToggleFollow);
        assert_eq!(ctl.mode(), FlightMode::Hovering);
        assert!(matches!(events[0], ControlEvent::CommandIgnored { .. }));
    }

    #[test]
    fn test_free_follow_clamps_into_envelope() {
        let link = RecordingLink::new();
        let profile = RigProfile { require_grip: false, step_leeway_min: 10.0, step_leeway_max: 20.0, ..quiet_profile() };
        let mut ctl = hovering(profile, &link);
        ctl.command(OperatorCommand::ToggleFollow);

        let vehicle = PoseSample::at(0.0, 0.0, 1.0);
        ctl.tick(&snapshot(vehicle, PoseSample::at(3.0, 0.0, 3.0), PoseSample::at(3.0, 0.0, 3.0)));
        let goal = ctl.goal();
        assert_eq!(goal.x, 1.5);
        assert_eq!(goal.z, 1.8);

        // Wands gone: hold the vehicle's own position
        ctl.tick(&snapshot(vehicle, PoseSample::lost(), PoseSample::lost()));
        assert_eq!(ctl.mode(), FlightMode::Follow);
        assert_eq!(ctl.goal().position(), vehicle.position());
    }

    #[test]
    fn test_hover_spin_damped_while_training() {
        let link = RecordingLink::new();
        let profile = RigProfile { hover_spin_rate: 1.0, min_window: 100, ..RigProfile::default() };
        let mut ctl = hovering(profile, &link);
        let vehicle = PoseSample::at(0.0, 0.0, 1.0);

        ctl.tick(&snapshot(vehicle, PoseSample::lost(), PoseSample::lost()));
        let idle_step = ctl.goal().yaw;
        assert!((idle_step - 1.0).abs() < 1e-9);

        let (l, r) = grip_hands(&vehicle);
        for _ in 0..50 {
            ctl.tick(&snapshot(vehicle, l, r));
        }
        let before = ctl.goal().yaw;
        ctl.tick(&snapshot(vehicle, l, r));
        let damped_step = ctl.goal().yaw - before;
        assert!(damped_step < 0.6 && damped_step > 0.4, "step {}", damped_step);
    }

    #[test]
    fn test_wrap_degrees() {
        assert_eq!(wrap_degrees(190.0), -170.0);
        assert_eq!(wrap_degrees(-190.0), 170.0);
        assert_eq!(wrap_degrees(180.0), 180.0);
        assert_eq!(wrap_degrees(45.0), 45.0);
    }
}
