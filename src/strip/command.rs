use std::fmt;

use color_eyre::Result;
use serde::{Deserialize, Deserializer};

use super::color_state::ColorState;
use crate::pwm::PwmDriver;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum PowerState {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct Rgb {
    #[serde(deserialize_with = "level")]
    pub r: u8,
    #[serde(deserialize_with = "level")]
    pub g: u8,
    #[serde(deserialize_with = "level")]
    pub b: u8,
}

/// Light command in the Home Assistant JSON schema.
///
/// Only `state`, `color.{r,g,b}`, `brightness` and `white` are used. Other
/// keys Home Assistant sends (`color_mode`, `color_temp`, `effect`,
/// `transition`, `x`/`y`, `h`/`s`, ...) are accepted and ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Command {
    pub state: Option<PowerState>,
    pub color: Option<Rgb>,
    #[serde(default, deserialize_with = "optional_level")]
    pub brightness: Option<u8>,
    #[serde(default, deserialize_with = "optional_level")]
    pub white: Option<u8>,
}

/// Accepts any JSON number and saturates it into `0..=255`.
fn level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Ok(saturate(value))
}

fn optional_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.map(saturate))
}

fn saturate(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

pub fn decode_command(payload: &[u8]) -> Result<Command> {
    let de = &mut serde_json::Deserializer::from_slice(payload);
    let command: Command = serde_path_to_error::deserialize(&mut *de)?;
    de.end()?;

    Ok(command)
}

/// The branch of [`interpret`] that handled a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Color(Rgb),
    Brightness(u8),
    White(u8),
    TurnOn,
    TurnOff,
    Ignored,
}

impl fmt::Display for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applied::Color(Rgb { r, g, b }) => write!(f, "color set to {}/{}/{}", r, g, b),
            Applied::Brightness(brightness) => write!(f, "brightness set to {}", brightness),
            Applied::White(white) => write!(f, "white set to {}", white),
            Applied::TurnOn => write!(f, "turned on"),
            Applied::TurnOff => write!(f, "turned off"),
            Applied::Ignored => write!(f, "ignored"),
        }
    }
}

/// Applies `command` to `state`.
///
/// The first matching rule wins, so a command carrying both `color` and
/// `brightness` only changes the color:
///
/// 1. `ON` with `color` sets the three channels
/// 2. `ON` with `brightness` sets the brightness
/// 3. `ON` with `white` sets all channels to that value
/// 4. `ON` alone turns the strip fully on (white 255)
/// 5. `OFF` turns the strip off (white 0)
/// 6. anything else is ignored
pub fn interpret<D: PwmDriver>(command: &Command, state: &mut ColorState<D>) -> Applied {
    match (command.state, command.color, command.brightness, command.white) {
        (Some(PowerState::On), Some(color), _, _) => {
            state.set_red(color.r);
            state.set_green(color.g);
            state.set_blue(color.b);
            Applied::Color(color)
        }
        (Some(PowerState::On), None, Some(brightness), _) => {
            state.set_brightness(brightness);
            Applied::Brightness(brightness)
        }
        (Some(PowerState::On), None, None, Some(white)) => {
            state.set_white(white);
            Applied::White(white)
        }
        (Some(PowerState::On), None, None, None) => {
            state.set_white(u8::MAX);
            Applied::TurnOn
        }
        (Some(PowerState::Off), _, _, _) => {
            state.set_white(0);
            Applied::TurnOff
        }
        (Some(PowerState::Unknown), _, _, _) | (None, _, _, _) => Applied::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strip::color_state::{tests::RecordingPwm, Snapshot};

    fn run(json: &str) -> (Applied, ColorState<RecordingPwm>, RecordingPwm) {
        let pwm = RecordingPwm::default();
        let mut state = ColorState::new(pwm.clone());
        let command = decode_command(json.as_bytes()).unwrap();
        let applied = interpret(&command, &mut state);
        (applied, state, pwm)
    }

    fn snapshot(red: u8, green: u8, blue: u8, brightness: u8) -> Snapshot {
        Snapshot {
            red,
            green,
            blue,
            brightness,
        }
    }

    #[test]
    fn color_sets_channels_and_keeps_brightness() {
        let (applied, state, _) = run(r#"{"state":"ON","color":{"r":10,"g":20,"b":30}}"#);

        assert_eq!(applied, Applied::Color(Rgb { r: 10, g: 20, b: 30 }));
        assert_eq!(state.snapshot(), snapshot(10, 20, 30, 255));
    }

    #[test]
    fn color_takes_precedence_over_brightness() {
        let (applied, state, pwm) =
            run(r#"{"state":"ON","color":{"r":10,"g":20,"b":30},"brightness":50}"#);

        assert!(matches!(applied, Applied::Color(_)));
        assert_eq!(state.snapshot(), snapshot(10, 20, 30, 255));
        assert_eq!(pwm.writes().len(), 3);
    }

    #[test]
    fn brightness_takes_precedence_over_white() {
        let (applied, state, _) = run(r#"{"state":"ON","brightness":40,"white":189}"#);

        assert_eq!(applied, Applied::Brightness(40));
        assert_eq!(state.snapshot(), snapshot(0, 0, 0, 40));
    }

    #[test]
    fn white_sets_all_channels() {
        let (applied, state, _) = run(r#"{"state":"ON","white":189}"#);

        assert_eq!(applied, Applied::White(189));
        assert_eq!(state.snapshot(), snapshot(189, 189, 189, 255));
    }

    #[test]
    fn on_alone_is_full_white() {
        let (applied, state, pwm) = run(r#"{"state":"ON"}"#);

        assert_eq!(applied, Applied::TurnOn);
        assert_eq!(state.snapshot(), snapshot(255, 255, 255, 255));
        assert_eq!(pwm.duties(), [Some(1023), Some(1023), Some(1023)]);
    }

    #[test]
    fn off_clears_channels_and_keeps_brightness() {
        let pwm = RecordingPwm::default();
        let mut state = ColorState::new(pwm.clone());
        state.set_brightness(77);
        state.set_white(200);

        let command = decode_command(br#"{"state":"OFF","color":{"r":1,"g":2,"b":3}}"#).unwrap();
        let applied = interpret(&command, &mut state);

        assert_eq!(applied, Applied::TurnOff);
        assert_eq!(state.snapshot(), snapshot(0, 0, 0, 77));
        assert_eq!(pwm.duties(), [Some(0), Some(0), Some(0)]);
    }

    #[test]
    fn unknown_or_missing_state_is_ignored() {
        for json in [
            r#"{"color":{"r":1,"g":2,"b":3}}"#,
            r#"{"state":"on"}"#,
            r#"{"state":"TOGGLE","white":10}"#,
            r#"{}"#,
        ] {
            let (applied, state, pwm) = run(json);

            assert_eq!(applied, Applied::Ignored, "{}", json);
            assert_eq!(state.snapshot(), snapshot(0, 0, 0, 255));
            assert!(pwm.writes().is_empty());
        }
    }

    #[test]
    fn applied_describes_the_change() {
        assert_eq!(
            Applied::Color(Rgb { r: 1, g: 2, b: 3 }).to_string(),
            "color set to 1/2/3"
        );
        assert_eq!(Applied::Brightness(40).to_string(), "brightness set to 40");
        assert_eq!(Applied::Ignored.to_string(), "ignored");
    }

    #[test]
    fn home_assistant_extras_are_ignored() {
        let command = decode_command(
            br#"{
                "brightness": 255,
                "color_mode": "rgb",
                "color_temp": 155,
                "color": {"r": 255, "g": 180, "b": 200, "c": 100, "w": 50,
                          "x": 0.406, "y": 0.301, "h": 344.0, "s": 29.412},
                "effect": "colorloop",
                "state": "ON",
                "transition": 2
            }"#,
        )
        .unwrap();

        assert_eq!(command.state, Some(PowerState::On));
        assert_eq!(command.color, Some(Rgb { r: 255, g: 180, b: 200 }));
        assert_eq!(command.brightness, Some(255));
    }

    #[test]
    fn levels_saturate() {
        let command =
            decode_command(br#"{"state":"ON","color":{"r":300,"g":-5,"b":12.9},"white":1e9}"#)
                .unwrap();

        assert_eq!(command.color, Some(Rgb { r: 255, g: 0, b: 12 }));
        assert_eq!(command.white, Some(255));
    }

    #[test]
    fn null_fields_count_as_absent() {
        let command = decode_command(br#"{"state":"ON","brightness":null}"#).unwrap();

        assert_eq!(command.brightness, None);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let payloads: [&[u8]; 7] = [
            b"not json",
            br#"{"state":"ON""#,
            br#"{"state":"ON"} trailing"#,
            b"42",
            br#"{"state":"ON","color":{"r":1,"g":2}}"#,
            br#"{"state":"ON","brightness":"high"}"#,
            &[0xff, 0xfe],
        ];

        for payload in payloads {
            assert!(decode_command(payload).is_err());
        }
    }

    #[test]
    fn decode_error_names_the_field() {
        let error =
            decode_command(br#"{"state":"ON","color":{"r":1,"g":"x","b":3}}"#).unwrap_err();

        assert!(format!("{}", error).contains("color.g"));
    }
}
