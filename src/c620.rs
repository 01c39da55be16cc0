// C620 motor driver state for M3508 motors

use crate::can_protocol::{decode_telemetry, encode_commands, RawFrame, Telemetry, SLOT_COUNT};

/// Full-scale raw current command (±16384 ≙ ±20 A)
pub const MAX_CURRENT: i16 = 16384;

/// Encoder counts per mechanical revolution (13-bit)
pub const ENCODER_RESOLUTION: u16 = 8192;

/// State of one motor on the bus
///
/// Telemetry is written only by [`MotorRegistry::update`] and the command
/// only through [`MotorState::set_current`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorState {
    /// Rotor angle in raw encoder counts (0-8191)
    angle: u16,
    /// Rotor speed [RPM]
    rpm: i16,
    /// Measured torque current (raw driver units)
    measured_current: i16,
    /// Motor temperature [°C]
    temperature: u8,
    /// Current command sent to the driver, always within ±MAX_CURRENT
    commanded_current: i16,
}

impl MotorState {
    pub const fn new() -> Self {
        Self {
            angle: 0,
            rpm: 0,
            measured_current: 0,
            temperature: 0,
            commanded_current: 0,
        }
    }

    /// Set the current command as a fraction of full scale
    ///
    /// # Arguments
    /// * `fraction` - Desired current, `1.0` = +MAX_CURRENT. Values outside
    ///   `[-1.0, 1.0]` saturate; NaN commands zero.
    pub fn set_current(&mut self, fraction: f32) {
        self.commanded_current = current_to_raw(fraction);
    }

    /// Get the rotor angle [raw counts]
    pub fn angle(&self) -> u16 {
        self.angle
    }

    /// Get the rotor angle [deg]
    pub fn angle_degrees(&self) -> f32 {
        self.angle as f32 * 360.0 / ENCODER_RESOLUTION as f32
    }

    /// Get the rotor speed [RPM]
    pub fn rpm(&self) -> i16 {
        self.rpm
    }

    /// Get the measured current [raw]
    pub fn measured_current(&self) -> i16 {
        self.measured_current
    }

    /// Get the temperature [°C]
    pub fn temperature(&self) -> u8 {
        self.temperature
    }

    /// Get the raw current command
    pub fn raw_current(&self) -> i16 {
        self.commanded_current
    }

    fn apply(&mut self, telemetry: &Telemetry) {
        self.angle = telemetry.angle;
        self.rpm = telemetry.rpm;
        self.measured_current = telemetry.measured_current;
        self.temperature = telemetry.temperature;
    }
}

/// Convert a full-scale fraction to a raw current command
///
/// Rounds to nearest and clamps to ±MAX_CURRENT.
pub fn current_to_raw(fraction: f32) -> i16 {
    if fraction.is_nan() {
        return 0;
    }
    let max = MAX_CURRENT as f32;
    libm::roundf(fraction * max).clamp(-max, max) as i16
}

/// Fixed table of the eight motors behind one C620 bus
///
/// Slot `i` holds the motor reporting on telemetry id `0x201 + i`.
#[derive(Debug, Clone, Default)]
pub struct MotorRegistry {
    slots: [MotorState; SLOT_COUNT],
}

impl MotorRegistry {
    pub const fn new() -> Self {
        Self {
            slots: [MotorState::new(); SLOT_COUNT],
        }
    }

    /// Route a received frame to its slot
    ///
    /// # Returns
    /// * `Some(slot)` if the frame was telemetry and the slot was updated
    /// * `None` if the frame was ignored
    pub fn update(&mut self, frame: &RawFrame) -> Option<usize> {
        let Some((slot, telemetry)) = decode_telemetry(frame) else {
            trace!("Ignored CAN frame 0x{:03X}", frame.id);
            return None;
        };

        self.slots[slot].apply(&telemetry);
        Some(slot)
    }

    /// Get a slot
    ///
    /// # Panics
    /// If `index >= 8`
    pub fn slot(&self, index: usize) -> &MotorState {
        &self.slots[index]
    }

    /// Get a slot mutably
    ///
    /// # Panics
    /// If `index >= 8`
    pub fn slot_mut(&mut self, index: usize) -> &mut MotorState {
        &mut self.slots[index]
    }

    /// Current commands of all slots in slot order
    pub fn snapshot_commands(&self) -> [i16; SLOT_COUNT] {
        self.slots.map(|motor| motor.commanded_current)
    }

    /// Encode all current commands into the two driver frames
    pub fn to_frames(&self) -> [RawFrame; 2] {
        encode_commands(&self.snapshot_commands())
    }

    pub fn iter(&self) -> core::slice::Iter<'_, MotorState> {
        self.slots.iter()
    }
}

impl core::ops::Index<usize> for MotorRegistry {
    type Output = MotorState;

    fn index(&self, index: usize) -> &MotorState {
        self.slot(index)
    }
}

impl core::ops::IndexMut<usize> for MotorRegistry {
    fn index_mut(&mut self, index: usize) -> &mut MotorState {
        self.slot_mut(index)
    }
}

impl<'a> IntoIterator for &'a MotorRegistry {
    type Item = &'a MotorState;
    type IntoIter = core::slice::Iter<'a, MotorState>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
