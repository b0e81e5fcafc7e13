use log::Level;

use crate::{
    log_buffer::LogBuffer,
    pwm::PwmDriver,
    strip::{
        command::{decode_command, Applied},
        StripController,
    },
};

/// Decodes a payload from the command topic and applies it to the strip.
///
/// Returns `None` when the payload could not be decoded. The message is then
/// dropped, the strip is left untouched and a single entry is added to
/// `log_buffer`. A decoded command whose duty writes fail still updates the
/// stored state, and the failure is added to `log_buffer` as one entry.
pub fn handle_command_payload<D: PwmDriver>(
    strip: &mut StripController<D>,
    log_buffer: &LogBuffer,
    payload: &[u8],
) -> Option<Applied> {
    match decode_command(payload) {
        Ok(command) => {
            let applied = strip.apply(&command);
            log::info!("Command {}, state is now {:?}", applied, strip.snapshot());

            if let Some(e) = strip.take_write_error() {
                log_buffer.report(
                    Level::Error,
                    format!("Command {} did not reach the PWM outputs: {:#}", applied, e),
                );
            }

            Some(applied)
        }
        Err(e) => {
            log_buffer.report(
                Level::Warn,
                format!(
                    "Cannot parse incoming message as JSON ({}): {}",
                    e,
                    String::from_utf8_lossy(payload)
                ),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strip::{
        color_state::{
            tests::{FailingPwm, RecordingPwm},
            Snapshot,
        },
        command::Rgb,
    };

    #[test]
    fn valid_payload_is_applied() {
        let pwm = RecordingPwm::default();
        let mut strip = StripController::new("led_strip", pwm.clone());
        let log_buffer = LogBuffer::new(16);

        let applied = handle_command_payload(
            &mut strip,
            &log_buffer,
            br#"{"state":"ON","color":{"r":10,"g":20,"b":30}}"#,
        );

        assert_eq!(applied, Some(Applied::Color(Rgb { r: 10, g: 20, b: 30 })));
        assert_eq!(pwm.writes().len(), 3);
        assert!(log_buffer.is_empty());
    }

    #[test]
    fn malformed_payload_is_dropped_with_one_log_entry() {
        let pwm = RecordingPwm::default();
        let mut strip = StripController::new("led_strip", pwm.clone());
        strip.apply(&decode_command(br#"{"state":"ON","white":100}"#).unwrap());
        pwm.clear();
        let before = strip.snapshot();
        let log_buffer = LogBuffer::new(16);

        let applied = handle_command_payload(&mut strip, &log_buffer, b"{\"state\":\"OFF\"");

        assert_eq!(applied, None);
        assert_eq!(strip.snapshot(), before);
        assert_eq!(
            strip.snapshot(),
            Snapshot {
                red: 100,
                green: 100,
                blue: 100,
                brightness: 255
            }
        );
        assert!(pwm.writes().is_empty());
        assert_eq!(log_buffer.len(), 1);
        assert!(log_buffer
            .drain_one()
            .unwrap()
            .starts_with("Cannot parse incoming message as JSON"));
    }

    #[test]
    fn failed_pwm_write_is_logged_once() {
        let mut strip = StripController::new("led_strip", FailingPwm);
        let log_buffer = LogBuffer::new(16);

        let applied = handle_command_payload(&mut strip, &log_buffer, br#"{"state":"ON"}"#);

        assert_eq!(applied, Some(Applied::TurnOn));
        assert_eq!(strip.snapshot().red, 255);
        assert_eq!(log_buffer.len(), 1);
        let message = log_buffer.drain_one().unwrap();
        assert!(message
            .starts_with("Command turned on did not reach the PWM outputs: 3 duty writes failed"));
        assert!(message.contains("Permission denied"));
    }
}
