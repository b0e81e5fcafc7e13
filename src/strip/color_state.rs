use eyre::Report;
use serde::Serialize;

use crate::pwm::{Channel, PwmDriver, MAX_DUTY};

/// Scales a channel value by the global brightness, rounding down.
pub fn scale(value: u8, brightness: u8) -> u8 {
    // value * brightness / 255 never exceeds 255
    (u16::from(value) * u16::from(brightness) / 255) as u8
}

/// Maps a 0-255 level onto the 0-1023 duty range, rounding down.
pub fn duty(level: u8) -> u16 {
    if level == 0 {
        0
    } else {
        (u32::from(level) * u32::from(MAX_DUTY) / 255) as u16
    }
}

/// Unscaled channel values and brightness as reported on the state topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub brightness: u8,
}

/// Current light state of the strip.
///
/// Only the commanded channel values are stored. Every setter derives the
/// duty from `(value, brightness)` and writes it to the driver straight away,
/// so the hardware never lags behind the stored state. A failed write does
/// not undo the stored value; it is kept until [`ColorState::take_write_error`]
/// collects it.
#[derive(Debug)]
pub struct ColorState<D> {
    driver: D,
    red: u8,
    green: u8,
    blue: u8,
    brightness: u8,
    write_error: Option<Report>,
    failed_writes: usize,
}

impl<D: PwmDriver> ColorState<D> {
    pub fn new(driver: D) -> Self {
        ColorState {
            driver,
            red: 0,
            green: 0,
            blue: 0,
            brightness: u8::MAX,
            write_error: None,
            failed_writes: 0,
        }
    }

    fn write(&mut self, channel: Channel, value: u8) {
        let duty = duty(scale(value, self.brightness));
        log::debug!("{:?} {} -> duty {}", channel, value, duty);

        if let Err(e) = self.driver.set_duty_cycle(channel, duty) {
            self.failed_writes += 1;
            if self.write_error.is_none() {
                self.write_error =
                    Some(e.wrap_err(format!("Failed to set {:?} duty to {}", channel, duty)));
            }
        }
    }

    /// Returns the first duty write that failed since the last call, if any.
    pub fn take_write_error(&mut self) -> Option<Report> {
        let error = self.write_error.take()?;
        let failed = std::mem::take(&mut self.failed_writes);

        Some(match failed {
            1 => error,
            _ => error.wrap_err(format!("{} duty writes failed", failed)),
        })
    }

    pub fn set_red(&mut self, value: u8) {
        self.red = value;
        self.write(Channel::Red, value);
    }

    pub fn set_green(&mut self, value: u8) {
        self.green = value;
        self.write(Channel::Green, value);
    }

    pub fn set_blue(&mut self, value: u8) {
        self.blue = value;
        self.write(Channel::Blue, value);
    }

    /// Stores the new brightness and rewrites all three channels against it.
    pub fn set_brightness(&mut self, value: u8) {
        self.brightness = value;
        self.set_red(self.red);
        self.set_green(self.green);
        self.set_blue(self.blue);
    }

    /// Sets all channels to the same value, `0` turns the strip off.
    pub fn set_white(&mut self, value: u8) {
        self.set_red(value);
        self.set_green(value);
        self.set_blue(value);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            red: self.red,
            green: self.green,
            blue: self.blue,
            brightness: self.brightness,
        }
    }
}
