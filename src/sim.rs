// sim.rs — Simulated flight rig
//
// Stands in for the motion-capture feed and the radio link so the control
// core can run end to end without hardware. One async producer per tracked
// body publishes into the pose table, with deterministic jitter and
// periodic tracking dropouts. The vehicle chases its last setpoint at a
// bounded speed and drops to the floor when stopped.

use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::dispatcher::SetpointLink;
use crate::pose_table::PoseTable;
use crate::types::{BatteryState, BodyId, GoalPosition, Point3, PoseSample};

#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Motion-capture frame rate.
    pub rate_hz: u64,
    pub max_speed: f64,
    pub fall_speed: f64,
    /// Peak amplitude of per-axis position noise (m).
    pub jitter: f64,
    /// Every `dropout_every` frames, `dropout_len` frames come back lost. 0 disables.
    pub dropout_every: u64,
    pub dropout_len: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rate_hz: 100,
            max_speed: 1.0,
            fall_speed: 0.5,
            jitter: 0.003,
            dropout_every: 700,
            dropout_len: 5,
        }
    }
}

impl SimConfig {
    pub fn frame_period(&self) -> Duration {
        // Millisecond resolution; never zero
        Duration::from_millis((1000 / self.rate_hz.max(1)).max(1))
    }

    pub fn is_dropout(&self, seq: u64) -> bool {
        self.dropout_every > 0 && seq % self.dropout_every >= self.dropout_every - self.dropout_len.min(self.dropout_every)
    }
}

/// Repeatable noise in [-amplitude, amplitude].
pub fn jitter(seq: u64, salt: f64, amplitude: f64) -> f64 {
    let h = ((seq as f64) * 12.9898 + salt * 78.233).sin() * 43758.5453;
    amplitude * (h.rem_euclid(1.0) * 2.0 - 1.0)
}

struct VehicleShared {
    target: AtomicCell<Option<GoalPosition>>,
    pose: AtomicCell<PoseSample>,
    connected: AtomicBool,
    setpoints: AtomicU64,
    stops: AtomicU64,
}

/// Simulated vehicle. Clones share state; one clone is handed to the
/// dispatcher as its link, another drives the vehicle's pose producer.
#[derive(Clone)]
pub struct SimVehicle {
    shared: Arc<VehicleShared>,
}

impl SimVehicle {
    pub fn new(start: Point3) -> Self {
        Self {
            shared: Arc::new(VehicleShared {
                target: AtomicCell::new(None),
                pose: AtomicCell::new(PoseSample::at(start.x, start.y, start.z)),
                connected: AtomicBool::new(true),
                setpoints: AtomicU64::new(0),
                stops: AtomicU64::new(0),
            }),
        }
    }

    pub fn pose(&self) -> PoseSample {
        self.shared.pose.load()
    }

    pub fn target(&self) -> Option<GoalPosition> {
        self.shared.target.load()
    }

    pub fn setpoints_received(&self) -> u64 {
        self.shared.setpoints.load(Ordering::Relaxed)
    }

    pub fn stops_received(&self) -> u64 {
        self.shared.stops.load(Ordering::Relaxed)
    }

    /// Advance the true pose by `dt` seconds. Only the vehicle producer calls this.
    pub fn step(&self, dt: f64, cfg: &SimConfig) -> PoseSample {
        let mut pose = self.shared.pose.load();
        let here = pose.position();

        let next = match self.shared.target.load() {
            Some(goal) => {
                pose.yaw = goal.yaw;
                let delta = goal.position() - here;
                let reach = cfg.max_speed * dt;
                if delta.norm() <= reach {
                    goal.position()
                } else {
                    here + delta.normalize() * reach
                }
            }
            // Motors off
            None => Point3::new(here.x, here.y, (here.z - cfg.fall_speed * dt).max(0.0)),
        };

        pose.x = next.x;
        pose.y = next.y;
        pose.z = next.z;
        self.shared.pose.store(pose);
        pose
    }
}

impl SetpointLink for SimVehicle {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn send_position(&mut self, x: f64, y: f64, z: f64, yaw: f64) {
        self.shared.target.store(Some(GoalPosition::new(x, y, z, yaw)));
        self.shared.setpoints.fetch_add(1, Ordering::Relaxed);
    }

    fn send_stop(&mut self) {
        self.shared.target.store(None);
        self.shared.stops.fetch_add(1, Ordering::Relaxed);
    }

    fn disconnect(&mut self) {
        self.shared.target.store(None);
        self.shared.connected.store(false, Ordering::Release);
        log::info!("Simulated link closed");
    }
}

/// Scripted operator hand.
///
/// Wanders before `grip_at` (seconds), then holds the vehicle's hover
/// point at a fixed offset, then sways along x from `sway_at` onward so
/// the vehicle has something to follow.
#[derive(Clone, Debug)]
pub struct WandScript {
    pub rest: Point3,
    /// Vehicle minus hand while gripping.
    pub grip_offset: Point3,
    pub hover_point: Point3,
    pub grip_at: f64,
    pub sway_at: f64,
    pub sway_amplitude: f64,
    pub sway_period: f64,
}

impl WandScript {
    pub fn left(hover_point: Point3) -> Self {
        Self {
            rest: Point3::new(-0.6, 0.4, 0.9),
            grip_offset: Point3::new(0.25, 0.0, 0.15),
            hover_point,
            grip_at: 4.0,
            sway_at: 7.0,
            sway_amplitude: 0.3,
            sway_period: 8.0,
        }
    }

    pub fn right(hover_point: Point3) -> Self {
        Self {
            rest: Point3::new(0.6, 0.4, 0.9),
            grip_offset: Point3::new(-0.25, 0.0, 0.15),
            ..Self::left(hover_point)
        }
    }

    /// Noise-free hand position `t` seconds into the session.
    pub fn position_at(&self, t: f64) -> Point3 {
        use std::f64::consts::PI;

        if t < self.grip_at {
            let wander = Point3::new((t * 4.0 * PI).sin(), (t * 3.0 * PI).cos(), (t * 5.0 * PI).sin());
            return self.rest + wander * 0.15;
        }

        let held = self.hover_point - self.grip_offset;
        if t < self.sway_at {
            return held;
        }
        let phase = (t - self.sway_at) * 2.0 * PI / self.sway_period;
        held + Point3::new(self.sway_amplitude * phase.sin(), 0.0, 0.0)
    }
}

fn noisy(p: &Point3, seq: u64, salt: f64, amplitude: f64) -> PoseSample {
    PoseSample::at(
        p.x + jitter(seq, salt, amplitude),
        p.y + jitter(seq, salt + 1.0, amplitude),
        p.z + jitter(seq, salt + 2.0, amplitude),
    )
}

pub async fn vehicle_loop(vehicle: SimVehicle, poses: Arc<PoseTable>, cfg: SimConfig, enabled: Arc<AtomicBool>) {
    let period = cfg.frame_period();
    let dt = period.as_secs_f64();
    let mut interval = interval(period);
    let mut seq = 0u64;

    while enabled.load(Ordering::Relaxed) {
        interval.tick().await;
        let truth = vehicle.step(dt, &cfg);

        let sample = if cfg.is_dropout(seq) {
            PoseSample::lost()
        } else {
            let mut s = noisy(&truth.position(), seq, 0.0, cfg.jitter);
            s.yaw = truth.yaw;
            s
        };
        poses.update(BodyId::Vehicle, sample);

        seq += 1;
        if seq % 1000 == 0 {
            log::debug!("[vehicle] {} frames", seq);
        }
    }
    poses.drop_stream(BodyId::Vehicle);
}

pub async fn wand_loop(
    body: BodyId,
    script: WandScript,
    poses: Arc<PoseTable>,
    cfg: SimConfig,
    enabled: Arc<AtomicBool>,
) {
    let period = cfg.frame_period();
    let mut interval = interval(period);
    let salt = 10.0 * (body.index() as f64 + 1.0);
    // Offset so wand and vehicle dropouts don't line up
    let skew = cfg.dropout_every / 3 * body.index() as u64;
    let mut seq = 0u64;

    while enabled.load(Ordering::Relaxed) {
        interval.tick().await;
        let t = seq as f64 * period.as_secs_f64();

        let sample = if cfg.is_dropout(seq + skew) {
            PoseSample::lost()
        } else {
            noisy(&script.position_at(t), seq, salt, cfg.jitter)
        };
        poses.update(body, sample);

        seq += 1;
        if seq % 1000 == 0 {
            log::debug!("[{}] {} frames", body.label(), seq);
        }
    }
    poses.drop_stream(body);
}

/// Reports `Battery` until `low_power_after`, then `LowPower`.
pub async fn battery_loop(
    tx: watch::Sender<Option<BatteryState>>,
    low_power_after: Option<Duration>,
    enabled: Arc<AtomicBool>,
) {
    let start = tokio::time::Instant::now();
    let mut interval = interval(Duration::from_millis(500));

    while enabled.load(Ordering::Relaxed) {
        interval.tick().await;
        let state = match low_power_after {
            Some(after) if start.elapsed() >= after => BatteryState::LowPower,
            _ => BatteryState::Battery,
        };
        tx.send_if_modified(|current| {
            if *current == Some(state) {
                return false;
            }
            *current = Some(state);
            true
        });
    }
}
