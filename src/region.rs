// src/region.rs
//
// Continuous-region detection (§3 "Continuous region", §4.3). Pure
// geometry/bookkeeping, independent of paging — [`cache::writer`] drives
// this and owns the page-locking consequence. Grounded on
// `printer_file_manager.c`'s `isSequential`/`processMove` pair, which
// uses `printer_math.c`'s `Dot` the same way: a nonnegative dot product
// of direction vectors continues the current region.

use crate::record::MotionOp;
use crate::timing::dot_xyz;

/// cos(30 deg), the continuity threshold from §3.
pub const COS_30_DEG: f64 = 0.866_025_403_784_438_6;

fn magnitude(v: (i32, i32, i32)) -> f64 {
    dot_xyz(v, v).sqrt()
}

/// `true` if `seg` continues the same direction as `last` to within
/// `COS_30_DEG`. A zero-length vector on either side can't be normalized,
/// so it breaks continuity (`isSequential`'s `0.000001 > length *
/// last_length` branch returns not-sequential for this case) — a
/// pure-extrusion move with no XYZ delta always starts a new region.
fn angle_continuous(last: (i32, i32, i32), seg: (i32, i32, i32)) -> bool {
    let (mag_last, mag_seg) = (magnitude(last), magnitude(seg));
    if mag_last == 0.0 || mag_seg == 0.0 {
        return false;
    }
    let cos_theta = dot_xyz(last, seg) / (mag_last * mag_seg);
    cos_theta >= COS_30_DEG
}

/// Per-region bookkeeping the annotator needs to decide whether the next
/// move continues the current chain (§3 "Continuous region": same fetch
/// speed, same opcode, angle test).
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionTracker {
    previous: Option<(u32, MotionOpKind)>,
    last_segment: (i32, i32, i32),
}

/// Mirrors [`MotionOp`] without pulling in the payload type, so
/// `RegionTracker` can be `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOpKind {
    Move,
    Home,
}

impl From<MotionOp> for MotionOpKind {
    fn from(op: MotionOp) -> Self {
        match op {
            MotionOp::Move => MotionOpKind::Move,
            MotionOp::Home => MotionOpKind::Home,
            _ => unreachable!("only move-like ops are tracked by regions"),
        }
    }
}

impl RegionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if a move with this fetch speed, opcode and XYZ delta
    /// continues the region currently open. Returns `false` unconditionally
    /// when there is no open region (`reset` was last called, or this is
    /// the first move ever seen).
    pub fn is_continuous(&self, fetch: u32, op: MotionOp, seg: (i32, i32, i32)) -> bool {
        match self.previous {
            Some((prev_fetch, prev_op)) => {
                prev_fetch == fetch
                    && prev_op == MotionOpKind::from(op)
                    && angle_continuous(self.last_segment, seg)
            }
            None => false,
        }
    }

    /// Record that a move with this fetch/opcode/delta was just appended,
    /// whether or not it started a new region.
    pub fn advance(&mut self, fetch: u32, op: MotionOp, seg: (i32, i32, i32)) {
        self.previous = Some((fetch, MotionOpKind::from(op)));
        self.last_segment = seg;
    }

    /// A non-move command terminates the region (§4.3: "Non-move commands
    /// ... terminate the current region").
    pub fn reset(&mut self) {
        self.previous = None;
        self.last_segment = (0, 0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_direction_is_continuous() {
        let mut t = RegionTracker::new();
        t.advance(1800, MotionOp::Move, (10, 0, 0));
        assert!(t.is_continuous(1800, MotionOp::Move, (10, 0, 0)));
    }

    #[test]
    fn ninety_degree_turn_breaks_continuity() {
        let mut t = RegionTracker::new();
        t.advance(1800, MotionOp::Move, (10, 0, 0));
        assert!(!t.is_continuous(1800, MotionOp::Move, (0, 10, 0)));
    }

    #[test]
    fn twenty_degree_turn_stays_continuous() {
        // cos(20deg) ~= 0.9397 > cos(30deg), so this should pass.
        let mut t = RegionTracker::new();
        t.advance(1800, MotionOp::Move, (1000, 0, 0));
        // tan(20deg) * 1000 ~= 364
        assert!(t.is_continuous(1800, MotionOp::Move, (940, 364, 0)));
    }

    #[test]
    fn different_fetch_speed_breaks_continuity() {
        let mut t = RegionTracker::new();
        t.advance(1800, MotionOp::Move, (10, 0, 0));
        assert!(!t.is_continuous(2400, MotionOp::Move, (10, 0, 0)));
    }

    #[test]
    fn reset_forces_a_new_region() {
        let mut t = RegionTracker::new();
        t.advance(1800, MotionOp::Move, (10, 0, 0));
        t.reset();
        assert!(!t.is_continuous(1800, MotionOp::Move, (10, 0, 0)));
    }

    #[test]
    fn pure_extrusion_move_breaks_the_region_on_zero_direction() {
        let mut t = RegionTracker::new();
        t.advance(300, MotionOp::Move, (0, 0, 0));
        assert!(!t.is_continuous(300, MotionOp::Move, (10, 0, 0)));
    }
}
