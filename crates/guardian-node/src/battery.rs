//! Battery voltage to percentage mapping.
//!
//! The cell reads 3.2 V empty and 4.2 V full through the board's
//! voltage divider. Readings below 2.5 V mean no cell is attached (the
//! node runs from USB) and report as 100%.

/// Full-charge voltage.
const BATTERY_FULL: f32 = 4.2;

/// Empty voltage.
const BATTERY_EMPTY: f32 = 3.2;

/// Below this there is no battery at all, just USB power.
const USB_THRESHOLD: f32 = 2.5;

/// Something that reads the battery voltage.
pub trait BatteryMonitor {
    fn read_voltage(&mut self) -> f32;

    fn percent(&mut self) -> u8 {
        battery_percent(self.read_voltage())
    }
}

/// Map a voltage reading to a 0..=100 percentage.
pub fn battery_percent(voltage: f32) -> u8 {
    if voltage < USB_THRESHOLD {
        return 100;
    }
    let fraction = (voltage - BATTERY_EMPTY) / (BATTERY_FULL - BATTERY_EMPTY);
    (fraction * 100.0).clamp(0.0, 100.0).round() as u8
}

/// Fixed-reading monitor for tests and simulation.
pub struct FixedBattery(pub f32);

impl BatteryMonitor for FixedBattery {
    fn read_voltage(&mut self) -> f32 {
        self.0
    }
}
