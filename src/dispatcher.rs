use crate::config::FlightEnvelope;
use crate::types::GoalPosition;

/// Commander side of the radio link to the vehicle.
///
/// Calls are fire-and-forget; the core never waits for an acknowledgment.
pub trait SetpointLink: Send {
    fn is_connected(&self) -> bool;
    fn send_position(&mut self, x: f64, y: f64, z: f64, yaw: f64);
    fn send_stop(&mut self);
    /// Drop the link. Used by kill and hard safety trips.
    fn disconnect(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No vehicle link; nothing sent.
    Skipped,
    Sent,
    /// Goal was at or below the floor; a stop was sent instead.
    Grounded,
}

/// The one place that decides between a position target and a stop.
pub struct SetpointDispatcher {
    link: Option<Box<dyn SetpointLink>>,
    floor_height: f64,
    envelope: FlightEnvelope,
    sent: u64,
    stops: u64,
}

impl SetpointDispatcher {
    pub fn new(link: Option<Box<dyn SetpointLink>>, floor_height: f64, envelope: FlightEnvelope) -> Self {
        Self { link, floor_height, envelope, sent: 0, stops: 0 }
    }

    pub fn has_link(&self) -> bool {
        self.link.as_ref().map(|l| l.is_connected()).unwrap_or(false)
    }

    pub fn setpoints_sent(&self) -> u64 {
        self.sent
    }

    pub fn stops_sent(&self) -> u64 {
        self.stops
    }

    fn connected_link(&mut self) -> Option<&mut Box<dyn SetpointLink>> {
        self.link.as_mut().filter(|l| l.is_connected())
    }

    /// Forward `goal`, or stop the motors if it asks for a height at or
    /// below the floor. Never sends a position target with such a height.
    pub fn send(&mut self, goal: &GoalPosition) -> DispatchOutcome {
        let floor = self.floor_height;
        let Some(link) = self.connected_link() else {
            return DispatchOutcome::Skipped;
        };

        if goal.z <= floor {
            link.send_stop();
            self.stops += 1;
            return DispatchOutcome::Grounded;
        }

        link.send_position(goal.x, goal.y, goal.z, goal.yaw);
        self.sent += 1;
        DispatchOutcome::Sent
    }

    /// Unconditional stop when a link is up.
    pub fn stop(&mut self) -> DispatchOutcome {
        let Some(link) = self.connected_link() else {
            return DispatchOutcome::Skipped;
        };
        link.send_stop();
        self.stops += 1;
        DispatchOutcome::Grounded
    }

    /// Stop the motors, then drop the link.
    pub fn kill(&mut self) {
        self.stop();
        if let Some(link) = self.link.as_mut() {
            link.disconnect();
        }
    }

    /// Component-wise clamp into the envelope, never below the hover floor.
    pub fn clamp(&self, goal: &GoalPosition) -> GoalPosition {
        let env = &self.envelope;
        let x = goal.x.clamp(env.min[0], env.max[0]);
        let y = goal.y.clamp(env.min[1], env.max[1]);
        let z = goal.z.clamp(env.min[2], env.max[2]).max(env.hover_floor);
        GoalPosition::new(x, y, z, goal.yaw)
    }
}
