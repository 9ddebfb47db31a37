use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::types::{BodyId, PoseSample};

/// One body's latest sample plus stream bookkeeping.
struct PoseSlot {
    sample: AtomicCell<PoseSample>,
    present: AtomicBool,
    updates: AtomicU64,
}

impl PoseSlot {
    fn new() -> Self {
        Self {
            sample: AtomicCell::new(PoseSample::lost()),
            present: AtomicBool::new(false),
            updates: AtomicU64::new(0),
        }
    }
}

/// Latest pose per tracked body, shared between producers and the control loop.
///
/// Each producer writes only its own slot, so there are no writer/writer
/// races. A snapshot reads the slots one after another and may therefore
/// mix samples of different ages across bodies.
pub struct PoseTable {
    slots: [PoseSlot; BodyId::COUNT],
}

/// Copy of the table taken at the start of a tick.
#[derive(Clone, Copy, Debug)]
pub struct PoseSnapshot {
    pub samples: [PoseSample; BodyId::COUNT],
    pub present: [bool; BodyId::COUNT],
}

impl PoseSnapshot {
    pub fn get(&self, body: BodyId) -> PoseSample {
        self.samples[body.index()]
    }

    pub fn vehicle(&self) -> PoseSample {
        self.get(BodyId::Vehicle)
    }

    pub fn left(&self) -> PoseSample {
        self.get(BodyId::LeftWand)
    }

    pub fn right(&self) -> PoseSample {
        self.get(BodyId::RightWand)
    }

    pub fn is_present(&self, body: BodyId) -> bool {
        self.present[body.index()]
    }

    /// Every stream has delivered at least one sample, valid or not.
    pub fn all_present(&self) -> bool {
        self.present.iter().all(|p| *p)
    }
}

impl PoseTable {
    pub fn new() -> Self {
        Self {
            slots: [PoseSlot::new(), PoseSlot::new(), PoseSlot::new()],
        }
    }

    /// Last-write-wins update from the body's producer.
    pub fn update(&self, body: BodyId, sample: PoseSample) {
        let slot = &self.slots[body.index()];
        slot.sample.store(sample);
        slot.updates.fetch_add(1, Ordering::Relaxed);
        slot.present.store(true, Ordering::Release);
    }

    /// The body's stream went away; its slot falls back to a lost sample.
    pub fn drop_stream(&self, body: BodyId) {
        let slot = &self.slots[body.index()];
        slot.present.store(false, Ordering::Release);
        slot.sample.store(PoseSample::lost());
    }

    pub fn update_count(&self, body: BodyId) -> u64 {
        self.slots[body.index()].updates.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PoseSnapshot {
        let mut samples = [PoseSample::lost(); BodyId::COUNT];
        let mut present = [false; BodyId::COUNT];
        for body in BodyId::ALL {
            let slot = &self.slots[body.index()];
            present[body.index()] = slot.present.load(Ordering::Acquire);
            samples[body.index()] = slot.sample.load();
        }
        PoseSnapshot { samples, present }
    }
}

impl Default for PoseTable {
    fn default() -> Self {
        Self::new()
    }
}
