//! Key-rotation scheduling.
//!
//! Both participants take turns re-keying the chat: the initiator on event
//! indices `0, 20, 40, ...`, the other party on `10, 30, 50, ...` (for the
//! default interval). If the party whose turn it was never sent anything, the
//! other side steps in once more than half an interval has passed since the
//! last rotation.
//!
//! All inputs are serials, which both parties agree on, so each side can
//! evaluate the schedule without consulting its local event log.

/// Events between rotations by the same party.
pub const ROTATION_INTERVAL: u64 = 20;

/// Session state the scheduler looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationInput {
    /// Serial of the next event to be sent or received
    pub current_serial: u64,
    /// Serial the chat began at
    pub serial_start: u64,
    /// Whether the local party created the chat
    pub is_initiator: bool,
    /// Serial of the most recent `KeyRotation`, if any
    pub last_rotation_serial: Option<u64>,
}

impl RotationInput {
    fn event_index(&self) -> u64 {
        self.current_serial.saturating_sub(self.serial_start)
    }
}

/// Decides when the next outgoing event must carry fresh key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationScheduler {
    interval: u64,
}

impl Default for RotationScheduler {
    fn default() -> Self {
        Self::new(ROTATION_INTERVAL)
    }
}

impl RotationScheduler {
    /// Create a scheduler. Intervals below 2 are raised to 2 so both parties
    /// keep a turn.
    pub fn new(interval: u64) -> Self {
        Self { interval: interval.max(2) }
    }

    /// Configured interval.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Whether `event_index` falls on the local party's turn.
    pub fn is_my_turn(&self, event_index: u64, is_initiator: bool) -> bool {
        let turn_offset = if is_initiator { 0 } else { self.interval / 2 };
        (event_index + turn_offset) % self.interval == 0
    }

    /// Whether a rotation is overdue regardless of whose turn it is.
    pub fn is_overdue(&self, input: &RotationInput) -> bool {
        let half = self.interval / 2;
        let last = input.last_rotation_serial.unwrap_or(input.serial_start);

        input.event_index() > half && input.current_serial.saturating_sub(last) > half
    }

    /// Whether the next outgoing event must be a `KeyRotation`.
    ///
    /// Never true for a fresh chat: the starting key was just encapsulated.
    pub fn should_rotate(&self, input: &RotationInput) -> bool {
        let event_index = input.event_index();
        if event_index == 0 {
            return false;
        }

        self.is_my_turn(event_index, input.is_initiator) || self.is_overdue(input)
    }
}
