//! Per-tick controller input snapshot.
//!
//! The embedder samples its devices once per fixed tick and hands the
//! snapshot to [`InteractionSystem::fixed_tick`](super::InteractionSystem::fixed_tick).
//! Edge detection (pressed this tick, released this tick) happens inside
//! the system against the previous snapshot, so callers only report levels.

/// Which physical hand a grabber or input channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandSide {
    Left,
    Right,
}

impl HandSide {
    pub fn other(self) -> Self {
        match self {
            HandSide::Left => HandSide::Right,
            HandSide::Right => HandSide::Left,
        }
    }
}

/// Button levels for one hand.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HandInput {
    /// Grip level used to start a grab.
    pub grab_active: bool,
    /// Grip level used to keep holding. Usually mirrors `grab_active`.
    pub hold_active: bool,
    /// Button that starts a force pull.
    pub force_grab_active: bool,
    /// Trigger used for activate/deactivate on held candidates.
    pub trigger_active: bool,
}

/// Input for both hands, sampled once per fixed tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputSnapshot {
    pub left: HandInput,
    pub right: HandInput,
}

impl InputSnapshot {
    pub fn hand(&self, side: HandSide) -> HandInput {
        match side {
            HandSide::Left => self.left,
            HandSide::Right => self.right,
        }
    }

    pub fn hand_mut(&mut self, side: HandSide) -> &mut HandInput {
        match side {
            HandSide::Left => &mut self.left,
            HandSide::Right => &mut self.right,
        }
    }
}
