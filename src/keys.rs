//! Variable key space. Every physical quantity of the robot at a time index maps to a
//! unique 64-bit key:
//!
//! ```text
//! | kind (8) | link id (16) | joint id (16) | time or phase index (24) |
//! ```
//!
//! The kind byte is an ASCII tag, so keys print readably, e.g. `q(2,5)` is the angle of
//! joint 2 at time 5. Keys with a zero kind byte are plain user keys (as used by generic
//! constraint sets) and never decode into a [`Variable`].

use std::fmt;

const KIND_SHIFT: u64 = 56;
const LINK_SHIFT: u64 = 40;
const JOINT_SHIFT: u64 = 24;
const ID_MASK: u64 = 0xFFFF;
const INDEX_MASK: u64 = 0xFF_FFFF;

/// Maximal link or joint id that fits into the key
pub const MAX_ID: usize = ID_MASK as usize;

/// Maximal time (or phase) index that fits into the key
pub const MAX_INDEX: usize = INDEX_MASK as usize;

/// Opaque variable identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(u64);

impl Key {
    /// Plain key, for variables that are not robot quantities.
    pub const fn new(raw: u64) -> Self {
        Key(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Decodes the physical quantity, None for plain user keys.
    pub fn variable(&self) -> Option<Variable> {
        let kind = (self.0 >> KIND_SHIFT) as u8;
        let link = ((self.0 >> LINK_SHIFT) & ID_MASK) as usize;
        let joint = ((self.0 >> JOINT_SHIFT) & ID_MASK) as usize;
        let t = (self.0 & INDEX_MASK) as usize;
        let variable = match kind {
            b'p' => Variable::Pose { link, t },
            b'V' => Variable::Twist { link, t },
            b'A' => Variable::TwistAccel { link, t },
            b'F' => Variable::Wrench { link, joint, t },
            b'T' => Variable::Torque { joint, t },
            b'q' => Variable::JointAngle { joint, t },
            b'v' => Variable::JointVel { joint, t },
            b'a' => Variable::JointAccel { joint, t },
            b'P' => Variable::PhaseDuration { phase: t },
            _ => return None,
        };
        Some(variable)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.variable() {
            Some(variable) => write!(f, "{}", variable),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Physical quantity of the robot at a time index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
    /// World pose of the link COM frame
    Pose { link: usize, t: usize },
    /// Link twist in its COM frame, `[angular; linear]`
    Twist { link: usize, t: usize },
    TwistAccel { link: usize, t: usize },
    /// Wrench exerted by the joint on the link, in the link COM frame
    Wrench { link: usize, joint: usize, t: usize },
    Torque { joint: usize, t: usize },
    JointAngle { joint: usize, t: usize },
    JointVel { joint: usize, t: usize },
    JointAccel { joint: usize, t: usize },
    PhaseDuration { phase: usize },
}

impl Variable {
    /// Encodes the quantity. Ids or indices that do not fit the layout would
    /// collide with other keys, so they panic.
    pub fn key(&self) -> Key {
        let (kind, link, joint, t) = match *self {
            Variable::Pose { link, t } => (b'p', link, 0, t),
            Variable::Twist { link, t } => (b'V', link, 0, t),
            Variable::TwistAccel { link, t } => (b'A', link, 0, t),
            Variable::Wrench { link, joint, t } => (b'F', link, joint, t),
            Variable::Torque { joint, t } => (b'T', 0, joint, t),
            Variable::JointAngle { joint, t } => (b'q', 0, joint, t),
            Variable::JointVel { joint, t } => (b'v', 0, joint, t),
            Variable::JointAccel { joint, t } => (b'a', 0, joint, t),
            Variable::PhaseDuration { phase } => (b'P', 0, 0, phase),
        };
        assert!(
            link <= MAX_ID && joint <= MAX_ID && t <= MAX_INDEX,
            "{:?} does not fit into the key layout",
            self
        );
        Key(((kind as u64) << KIND_SHIFT)
            | ((link as u64) << LINK_SHIFT)
            | ((joint as u64) << JOINT_SHIFT)
            | t as u64)
    }

    /// Time index, None for phase durations
    pub fn time(&self) -> Option<usize> {
        match *self {
            Variable::Pose { t, .. }
            | Variable::Twist { t, .. }
            | Variable::TwistAccel { t, .. }
            | Variable::Wrench { t, .. }
            | Variable::Torque { t, .. }
            | Variable::JointAngle { t, .. }
            | Variable::JointVel { t, .. }
            | Variable::JointAccel { t, .. } => Some(t),
            Variable::PhaseDuration { .. } => None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Variable::Pose { link, t } => write!(f, "p({},{})", link, t),
            Variable::Twist { link, t } => write!(f, "V({},{})", link, t),
            Variable::TwistAccel { link, t } => write!(f, "A({},{})", link, t),
            Variable::Wrench { link, joint, t } => write!(f, "F({},{},{})", link, joint, t),
            Variable::Torque { joint, t } => write!(f, "T({},{})", joint, t),
            Variable::JointAngle { joint, t } => write!(f, "q({},{})", joint, t),
            Variable::JointVel { joint, t } => write!(f, "v({},{})", joint, t),
            Variable::JointAccel { joint, t } => write!(f, "a({},{})", joint, t),
            Variable::PhaseDuration { phase } => write!(f, "P({})", phase),
        }
    }
}

pub fn pose_key(link: usize, t: usize) -> Key {
    Variable::Pose { link, t }.key()
}

pub fn twist_key(link: usize, t: usize) -> Key {
    Variable::Twist { link, t }.key()
}

pub fn twist_accel_key(link: usize, t: usize) -> Key {
    Variable::TwistAccel { link, t }.key()
}

pub fn wrench_key(link: usize, joint: usize, t: usize) -> Key {
    Variable::Wrench { link, joint, t }.key()
}

pub fn torque_key(joint: usize, t: usize) -> Key {
    Variable::Torque { joint, t }.key()
}

pub fn joint_angle_key(joint: usize, t: usize) -> Key {
    Variable::JointAngle { joint, t }.key()
}

pub fn joint_vel_key(joint: usize, t: usize) -> Key {
    Variable::JointVel { joint, t }.key()
}

pub fn joint_accel_key(joint: usize, t: usize) -> Key {
    Variable::JointAccel { joint, t }.key()
}

pub fn phase_key(phase: usize) -> Key {
    Variable::PhaseDuration { phase }.key()
}
