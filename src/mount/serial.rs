//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Direct-serial (ST4/pulse-guide-over-serial) mount driver. Demonstrates
//! the shape of a real hardware driver against the `Mount` trait; actual
//! ASCOM/INDI drivers are external collaborators and out of scope.
//!

#![cfg(feature = "mount_serial")]

use std::io::Write;
use std::time::Duration;

use crate::error::MountError;
use crate::mount::{Axis, Direction, Mount, MountInfo, MoveResult};

/// A mount controlled purely through ST4-style pulse-guide pins exposed
/// over a serial connection (e.g. a guide-port-to-serial adapter).
pub struct SerialPulseGuideMount {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialPulseGuideMount {
    pub fn connect(device_path: &str, baud_rate: u32) -> Result<SerialPulseGuideMount, MountError> {
        let port = serialport::new(device_path, baud_rate)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(|e| MountError::CannotConnect(e.to_string()))?;

        Ok(SerialPulseGuideMount { port, name: format!("Serial pulse-guide ({})", device_path) })
    }

    fn command_byte(axis: Axis, direction: Direction) -> u8 {
        match (axis, direction) {
            (Axis::Primary, Direction::Positive) => b'E',
            (Axis::Primary, Direction::Negative) => b'W',
            (Axis::Secondary, Direction::Positive) => b'N',
            (Axis::Secondary, Direction::Negative) => b'S',
        }
    }
}

impl Mount for SerialPulseGuideMount {
    fn info(&self) -> MountInfo {
        MountInfo { name: self.name.clone(), can_pulse_guide: true, can_slew: false }
    }

    fn pulse_guide(&mut self, axis: Axis, direction: Direction, duration_ms: u32) -> Result<MoveResult, MountError> {
        let cmd = [Self::command_byte(axis, direction), (duration_ms.min(u16::MAX as u32) >> 8) as u8, duration_ms as u8];
        self.port.write_all(&cmd).map_err(|e| MountError::Driver(e.to_string()))?;
        Ok(MoveResult::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_byte_maps_axes_and_directions() {
        assert_eq!(SerialPulseGuideMount::command_byte(Axis::Primary, Direction::Positive), b'E');
        assert_eq!(SerialPulseGuideMount::command_byte(Axis::Primary, Direction::Negative), b'W');
        assert_eq!(SerialPulseGuideMount::command_byte(Axis::Secondary, Direction::Positive), b'N');
        assert_eq!(SerialPulseGuideMount::command_byte(Axis::Secondary, Direction::Negative), b'S');
    }
}
