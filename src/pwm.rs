use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use color_eyre::Result;
use eyre::WrapErr;

use crate::settings::PwmSettings;

/// Highest duty value accepted by a channel (10-bit resolution).
pub const MAX_DUTY: u16 = 1023;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

/// Hardware side of the strip: one duty write per call, `duty` in `0..=MAX_DUTY`.
pub trait PwmDriver {
    fn set_duty_cycle(&mut self, channel: Channel, duty: u16) -> Result<()>;
}

impl PwmDriver for Box<dyn PwmDriver + Send> {
    fn set_duty_cycle(&mut self, channel: Channel, duty: u16) -> Result<()> {
        (**self).set_duty_cycle(channel, duty)
    }
}

pub fn mk_pwm_driver(settings: &PwmSettings) -> Result<Box<dyn PwmDriver + Send>> {
    use crate::settings::PwmBackend;

    let driver: Box<dyn PwmDriver + Send> = match settings.backend {
        PwmBackend::Log => Box::new(LogPwm::new(settings.frequency_hz)),
        PwmBackend::Sysfs => Box::new(SysfsPwm::open(settings)?),
    };

    Ok(driver)
}

/// Driver that only reports duty writes through the logger.
#[derive(Debug)]
pub struct LogPwm;

impl LogPwm {
    pub fn new(frequency_hz: u32) -> Self {
        log::info!("Using log-only PWM output at {} Hz", frequency_hz);
        LogPwm
    }
}

impl PwmDriver for LogPwm {
    fn set_duty_cycle(&mut self, channel: Channel, duty: u16) -> Result<()> {
        log::info!("PWM {:?} duty {}", channel, duty);
        Ok(())
    }
}

/// Linux sysfs PWM (`/sys/class/pwm/pwmchipN/pwmM`).
#[derive(Debug)]
pub struct SysfsPwm {
    red: PathBuf,
    green: PathBuf,
    blue: PathBuf,
    period_ns: u64,
}

impl SysfsPwm {
    pub fn open(settings: &PwmSettings) -> Result<Self> {
        Self::open_at(PathBuf::from("/sys/class/pwm"), settings)
    }

    fn open_at(root: PathBuf, settings: &PwmSettings) -> Result<Self> {
        if settings.frequency_hz == 0 {
            return Err(eyre::eyre!("PWM frequency must be greater than zero"));
        }

        let chip = root.join(format!("pwmchip{}", settings.chip));
        let period_ns = 1_000_000_000 / u64::from(settings.frequency_hz);

        let red = export_channel(&chip, settings.red, period_ns)?;
        let green = export_channel(&chip, settings.green, period_ns)?;
        let blue = export_channel(&chip, settings.blue, period_ns)?;

        log::info!(
            "Opened {} channels {}/{}/{} at {} Hz",
            chip.display(),
            settings.red,
            settings.green,
            settings.blue,
            settings.frequency_hz
        );

        Ok(SysfsPwm {
            red,
            green,
            blue,
            period_ns,
        })
    }

    fn duty_ns(&self, duty: u16) -> u64 {
        self.period_ns * u64::from(duty.min(MAX_DUTY)) / u64::from(MAX_DUTY)
    }
}

fn export_channel(chip: &Path, index: u32, period_ns: u64) -> Result<PathBuf> {
    let channel = chip.join(format!("pwm{}", index));

    if !channel.exists() {
        fs::write(chip.join("export"), index.to_string())
            .wrap_err_with(|| format!("Failed to export PWM channel {}", index))?;

        // udev needs a moment to fix up permissions on the new attributes
        thread::sleep(Duration::from_millis(100));
    }

    // Duty must never exceed the period, so zero it before changing the period
    fs::write(channel.join("duty_cycle"), "0")
        .wrap_err_with(|| format!("Failed to reset duty of {}", channel.display()))?;
    fs::write(channel.join("period"), period_ns.to_string())
        .wrap_err_with(|| format!("Failed to set period of {}", channel.display()))?;
    fs::write(channel.join("enable"), "1")
        .wrap_err_with(|| format!("Failed to enable {}", channel.display()))?;

    Ok(channel)
}

impl PwmDriver for SysfsPwm {
    fn set_duty_cycle(&mut self, channel: Channel, duty: u16) -> Result<()> {
        let path = match channel {
            Channel::Red => &self.red,
            Channel::Green => &self.green,
            Channel::Blue => &self.blue,
        };

        fs::write(path.join("duty_cycle"), self.duty_ns(duty).to_string())
            .wrap_err_with(|| format!("Failed to write duty to {}", path.display()))
    }
}
