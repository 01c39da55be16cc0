// CAN frame codec for the C620 motor driver

use embedded_can::{Frame, Id, StandardId};

/// CAN message IDs
pub mod can_ids {
    /// Lowest id accepted by the telemetry range check
    pub const TELEMETRY_MIN: u32 = 0x200;

    /// Highest id accepted by the telemetry range check
    pub const TELEMETRY_MAX: u32 = 0x208;

    /// Telemetry id of slot 0 (slot `i` reports on `0x201 + i`)
    pub const TELEMETRY_BASE: u32 = 0x201;

    /// Current command for slots 0-3 (4 x i16 big-endian, 8 bytes)
    pub const COMMAND_LOW: u32 = 0x200;

    /// Current command for slots 4-7 (4 x i16 big-endian, 8 bytes)
    pub const COMMAND_HIGH: u32 = 0x1FF;
}

/// Number of motor slots addressed by one driver bus
pub const SLOT_COUNT: usize = 8;

/// Payload length of every telemetry and command frame
pub const FRAME_LEN: u8 = 8;

/// Bus-level frame exchanged with the CAN peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawFrame {
    pub id: u32,
    pub is_standard: bool,
    pub is_data: bool,
    pub length: u8,
    pub payload: [u8; 8],
}

impl RawFrame {
    /// Create a standard 8-byte data frame
    pub const fn standard_data(id: u32, payload: [u8; 8]) -> Self {
        Self {
            id,
            is_standard: true,
            is_data: true,
            length: FRAME_LEN,
            payload,
        }
    }

    /// Copy any `embedded-can` frame into a `RawFrame`
    ///
    /// Remote frames keep their DLC but carry an all-zero payload.
    pub fn from_frame<F: Frame>(frame: &F) -> Self {
        let (id, is_standard) = match frame.id() {
            Id::Standard(std_id) => (std_id.as_raw() as u32, true),
            Id::Extended(ext_id) => (ext_id.as_raw(), false),
        };

        let mut payload = [0u8; 8];
        let data = frame.data();
        let len = data.len().min(8);
        payload[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            is_standard,
            is_data: frame.is_data_frame(),
            length: frame.dlc() as u8,
            payload,
        }
    }

    /// Build an `embedded-can` frame of type `F`
    ///
    /// # Returns
    /// * `None` if the id does not fit the frame format or the length exceeds 8
    pub fn to_frame<F: Frame>(&self) -> Option<F> {
        let id: Id = if self.is_standard {
            StandardId::new(u16::try_from(self.id).ok()?)?.into()
        } else {
            embedded_can::ExtendedId::new(self.id)?.into()
        };

        let len = usize::from(self.length);
        if len > 8 {
            return None;
        }

        if self.is_data {
            F::new(id, &self.payload[..len])
        } else {
            F::new_remote(id, len)
        }
    }

    /// Payload bytes covered by `length`
    pub fn data(&self) -> &[u8] {
        &self.payload[..usize::from(self.length).min(8)]
    }
}

/// Decoded motor telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Telemetry {
    /// Rotor angle in raw encoder counts (0-8191)
    pub angle: u16,
    /// Rotor speed [RPM]
    pub rpm: i16,
    /// Measured torque current (raw driver units)
    pub measured_current: i16,
    /// Motor temperature [°C]
    pub temperature: u8,
}

/// Map a telemetry id to its registry slot
///
/// Id `0x200` passes the range check but lies below the slot 0 address, so it
/// has no slot. On this bus it is the id of the low command frame.
pub fn telemetry_slot(id: u32) -> Option<usize> {
    let offset = id.checked_sub(can_ids::TELEMETRY_BASE)? as usize;
    (offset < SLOT_COUNT).then_some(offset)
}

/// Decode a telemetry frame from the driver
///
/// # Arguments
/// * `frame` - Frame received from the bus
///
/// # Returns
/// * `Some((slot, telemetry))` for a standard 8-byte data frame with an id in
///   `0x200..=0x208` that maps to a slot
/// * `None` for anything else (unrelated bus traffic is not an error)
pub fn decode_telemetry(frame: &RawFrame) -> Option<(usize, Telemetry)> {
    if !frame.is_standard || !frame.is_data || frame.length != FRAME_LEN {
        return None;
    }
    if !(can_ids::TELEMETRY_MIN..=can_ids::TELEMETRY_MAX).contains(&frame.id) {
        return None;
    }

    let slot = telemetry_slot(frame.id)?;
    let data = &frame.payload;

    let telemetry = Telemetry {
        angle: u16::from_be_bytes([data[0], data[1]]),
        rpm: i16::from_be_bytes([data[2], data[3]]),
        measured_current: i16::from_be_bytes([data[4], data[5]]),
        temperature: data[6],
    };

    Some((slot, telemetry))
}

/// Encode telemetry into an 8-byte payload (byte 7 is left zero)
///
/// Driver-side layout, for simulating a C620 in host tests.
#[cfg(test)]
pub(crate) fn encode_telemetry(telemetry: &Telemetry) -> [u8; 8] {
    let mut data = [0u8; 8];
    data[0..2].copy_from_slice(&telemetry.angle.to_be_bytes());
    data[2..4].copy_from_slice(&telemetry.rpm.to_be_bytes());
    data[4..6].copy_from_slice(&telemetry.measured_current.to_be_bytes());
    data[6] = telemetry.temperature;
    data
}

/// Encode the eight current commands into the two driver command frames
///
/// Slot `i` occupies bytes `2i, 2i+1` of a 16-byte buffer (big-endian i16).
///
/// # Returns
/// `[frame 0x200 (slots 0-3), frame 0x1FF (slots 4-7)]`
pub fn encode_commands(commands: &[i16; SLOT_COUNT]) -> [RawFrame; 2] {
    let mut buf = [0u8; 2 * SLOT_COUNT];
    for (chunk, command) in buf.chunks_exact_mut(2).zip(commands) {
        chunk.copy_from_slice(&command.to_be_bytes());
    }

    let mut low = [0u8; 8];
    let mut high = [0u8; 8];
    low.copy_from_slice(&buf[0..8]);
    high.copy_from_slice(&buf[8..16]);

    [
        RawFrame::standard_data(can_ids::COMMAND_LOW, low),
        RawFrame::standard_data(can_ids::COMMAND_HIGH, high),
    ]
}
