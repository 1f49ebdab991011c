//! Normalized client input and the fixed-layout XUSB report the bus consumes.
//!
//! Button bit values match the XInput gamepad layout:
//! https://docs.microsoft.com/en-us/windows/win32/api/xinput/ns-xinput-xinput_gamepad#members

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub mod buttons {
    pub const DPAD_UP: u16 = 0x0001;
    pub const DPAD_DOWN: u16 = 0x0002;
    pub const DPAD_LEFT: u16 = 0x0004;
    pub const DPAD_RIGHT: u16 = 0x0008;
    pub const START: u16 = 0x0010;
    pub const BACK: u16 = 0x0020;
    pub const LEFT_THUMB: u16 = 0x0040;
    pub const RIGHT_THUMB: u16 = 0x0080;
    pub const LEFT_SHOULDER: u16 = 0x0100;
    pub const RIGHT_SHOULDER: u16 = 0x0200;
    /// Not produced by client messages.
    pub const GUIDE: u16 = 0x0400;
    pub const A: u16 = 0x1000;
    pub const B: u16 = 0x2000;
    pub const X: u16 = 0x4000;
    pub const Y: u16 = 0x8000;
}

/// Largest trigger value the encoder produces.
pub const TRIGGER_MAX: u8 = 127;

const TRIGGER_SCALE: f64 = TRIGGER_MAX as f64;
const THUMB_SCALE: f64 = 32767.0;

/// One update message from a client. Axes are nominally in `[-1.0, 1.0]`.
///
/// Decoding is permissive: missing axes are `0.0`, missing buttons are
/// released, and unknown fields are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputState {
    #[serde(deserialize_with = "lenient_axis")]
    pub left_trigger: f64,
    #[serde(deserialize_with = "lenient_axis")]
    pub right_trigger: f64,
    #[serde(deserialize_with = "lenient_axis")]
    pub lx: f64,
    #[serde(deserialize_with = "lenient_axis")]
    pub ly: f64,
    #[serde(deserialize_with = "lenient_axis")]
    pub rx: f64,
    #[serde(deserialize_with = "lenient_axis")]
    pub ry: f64,

    #[serde(deserialize_with = "truthy")]
    pub a: bool,
    #[serde(deserialize_with = "truthy")]
    pub b: bool,
    #[serde(deserialize_with = "truthy")]
    pub x: bool,
    #[serde(deserialize_with = "truthy")]
    pub y: bool,
    /// Also labelled "start".
    #[serde(deserialize_with = "truthy")]
    pub home: bool,
    /// Also labelled "back".
    #[serde(deserialize_with = "truthy")]
    pub menu: bool,
    #[serde(deserialize_with = "truthy")]
    pub dpad_up: bool,
    #[serde(deserialize_with = "truthy")]
    pub dpad_down: bool,
    #[serde(deserialize_with = "truthy")]
    pub dpad_left: bool,
    #[serde(deserialize_with = "truthy")]
    pub dpad_right: bool,
    #[serde(deserialize_with = "truthy")]
    pub left_bumper: bool,
    #[serde(deserialize_with = "truthy")]
    pub right_bumper: bool,
    #[serde(deserialize_with = "truthy")]
    pub left_thumb: bool,
    #[serde(deserialize_with = "truthy")]
    pub right_thumb: bool,
}

impl InputState {
    /// Decode one client message. Only a payload that is not a JSON object is
    /// rejected; every field-level problem falls back to the neutral value.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(de::Error::custom(format!(
                "expected a JSON object, got {}",
                kind_of(&value)
            )));
        }
        InputState::deserialize(value)
    }

    /// The full button mask for this state. Released buttons contribute nothing.
    pub fn button_mask(&self) -> u16 {
        [
            (self.a, buttons::A),
            (self.b, buttons::B),
            (self.x, buttons::X),
            (self.y, buttons::Y),
            (self.home, buttons::START),
            (self.menu, buttons::BACK),
            (self.dpad_up, buttons::DPAD_UP),
            (self.dpad_down, buttons::DPAD_DOWN),
            (self.dpad_left, buttons::DPAD_LEFT),
            (self.dpad_right, buttons::DPAD_RIGHT),
            (self.left_bumper, buttons::LEFT_SHOULDER),
            (self.right_bumper, buttons::RIGHT_SHOULDER),
            (self.left_thumb, buttons::LEFT_THUMB),
            (self.right_thumb, buttons::RIGHT_THUMB),
        ]
        .iter()
        .filter(|(pressed, _)| *pressed)
        .fold(0, |mask, (_, bit)| mask | bit)
    }
}

/// XUSB_REPORT as laid out by the bus driver ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XusbReport {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

pub const XUSB_REPORT_SIZE: usize = std::mem::size_of::<XusbReport>();

impl XusbReport {
    /// Overwrite every field from `state`. Nothing from the previous report survives.
    pub fn apply(&mut self, state: &InputState) {
        self.buttons = state.button_mask();
        self.left_trigger = trigger(state.left_trigger);
        self.right_trigger = trigger(state.right_trigger);
        self.thumb_lx = thumb(state.lx);
        self.thumb_ly = thumb(state.ly);
        self.thumb_rx = thumb(state.rx);
        self.thumb_ry = thumb(state.ry);
    }

    /// Little-endian bytes in field order, identical to the in-memory layout on x86.
    pub fn to_bytes(&self) -> [u8; XUSB_REPORT_SIZE] {
        let mut out = [0u8; XUSB_REPORT_SIZE];
        out[0..2].copy_from_slice(&self.buttons.to_le_bytes());
        out[2] = self.left_trigger;
        out[3] = self.right_trigger;
        out[4..6].copy_from_slice(&self.thumb_lx.to_le_bytes());
        out[6..8].copy_from_slice(&self.thumb_ly.to_le_bytes());
        out[8..10].copy_from_slice(&self.thumb_rx.to_le_bytes());
        out[10..12].copy_from_slice(&self.thumb_ry.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; XUSB_REPORT_SIZE]) -> Self {
        Self {
            buttons: u16::from_le_bytes([bytes[0], bytes[1]]),
            left_trigger: bytes[2],
            right_trigger: bytes[3],
            thumb_lx: i16::from_le_bytes([bytes[4], bytes[5]]),
            thumb_ly: i16::from_le_bytes([bytes[6], bytes[7]]),
            thumb_rx: i16::from_le_bytes([bytes[8], bytes[9]]),
            thumb_ry: i16::from_le_bytes([bytes[10], bytes[11]]),
        }
    }
}

/// Encode a normalized state into a fresh report.
pub fn encode(state: &InputState) -> XusbReport {
    let mut report = XusbReport::default();
    report.apply(state);
    report
}

fn clamp_axis(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

// Negative trigger input has no meaning on the bus and lands on 0.
fn trigger(value: f64) -> u8 {
    (clamp_axis(value).max(0.0) * TRIGGER_SCALE).round() as u8
}

fn thumb(value: f64) -> i16 {
    (clamp_axis(value) * THUMB_SCALE).round() as i16
}

fn lenient_axis<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => numeric_string(&s),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    })
}

// Plain decimal text or a signed "Infinity"; every other spelling that
// `f64::from_str` would accept ("inf", "NaN", ...) counts as 0.
fn numeric_string(text: &str) -> f64 {
    let text = text.trim();
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        Ok(v) if v.is_infinite() && text.trim_start_matches(['+', '-']) == "Infinity" => v,
        _ => 0.0,
    }
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0 && !v.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(json: &str) -> InputState {
        InputState::from_json(json).expect("valid message")
    }

    #[test]
    fn report_layout_matches_the_bus_abi() {
        assert_eq!(XUSB_REPORT_SIZE, 12);
        assert_eq!(std::mem::align_of::<XusbReport>(), 2);

        let report = XusbReport {
            buttons: 0x1234,
            left_trigger: 0x56,
            right_trigger: 0x78,
            thumb_lx: -2,
            thumb_ly: 0x0102,
            thumb_rx: i16::MIN,
            thumb_ry: i16::MAX,
        };
        assert_eq!(
            report.to_bytes(),
            [0x34, 0x12, 0x56, 0x78, 0xFE, 0xFF, 0x02, 0x01, 0x00, 0x80, 0xFF, 0x7F]
        );
        assert_eq!(XusbReport::from_bytes(&report.to_bytes()), report);
    }

    #[test]
    fn thumb_axes_scale_by_32767() {
        for v in [-1.0, -0.75, -0.5, -0.001, 0.0, 0.25, 0.333, 0.5, 0.9999, 1.0] {
            let report = encode(&InputState {
                lx: v,
                ly: -v,
                rx: v,
                ry: -v,
                ..Default::default()
            });
            let expected = (v * 32767.0_f64).round() as i16;
            assert_eq!(report.thumb_lx, expected, "lx {v}");
            assert_eq!(report.thumb_ly, -expected, "ly {v}");
            assert_eq!(report.thumb_rx, expected, "rx {v}");
            assert_eq!(report.thumb_ry, -expected, "ry {v}");
        }
    }

    #[test]
    fn triggers_scale_by_127_and_ignore_negatives() {
        let cases = [
            (-1.0, 0),
            (-0.2, 0),
            (0.0, 0),
            (0.5, 64),
            (0.25, 32),
            (1.0, 127),
        ];
        for (v, expected) in cases {
            let report = encode(&InputState {
                left_trigger: v,
                right_trigger: v,
                ..Default::default()
            });
            assert_eq!(report.left_trigger, expected, "left {v}");
            assert_eq!(report.right_trigger, expected, "right {v}");
        }
    }

    #[test]
    fn out_of_range_axes_clamp() {
        let report = encode(&InputState {
            left_trigger: 4.0,
            lx: 3.5,
            ly: -12.0,
            rx: f64::INFINITY,
            ry: f64::NEG_INFINITY,
            ..Default::default()
        });
        assert_eq!(report.left_trigger, 127);
        assert_eq!(report.thumb_lx, 32767);
        assert_eq!(report.thumb_ly, -32767);
        assert_eq!(report.thumb_rx, 32767);
        assert_eq!(report.thumb_ry, -32767);
    }

    #[test]
    fn nan_encodes_like_zero() {
        let report = encode(&InputState {
            left_trigger: f64::NAN,
            right_trigger: f64::NAN,
            lx: f64::NAN,
            ly: f64::NAN,
            rx: f64::NAN,
            ry: f64::NAN,
            ..Default::default()
        });
        assert_eq!(report, encode(&InputState::default()));
        assert_eq!(report, XusbReport::default());
    }

    #[test]
    fn each_button_owns_one_bit() {
        let flags: [(&str, u16); 14] = [
            ("a", 0x1000),
            ("b", 0x2000),
            ("x", 0x4000),
            ("y", 0x8000),
            ("home", 0x0010),
            ("menu", 0x0020),
            ("dpadUp", 0x0001),
            ("dpadDown", 0x0002),
            ("dpadLeft", 0x0004),
            ("dpadRight", 0x0008),
            ("leftBumper", 0x0100),
            ("rightBumper", 0x0200),
            ("leftThumb", 0x0040),
            ("rightThumb", 0x0080),
        ];
        let all = flags.iter().fold(0u16, |mask, (_, bit)| mask | bit);
        for (name, bit) in flags {
            let pressed = state(&format!(r#"{{"{name}": true}}"#));
            assert_eq!(pressed.button_mask(), bit, "{name}");

            // Everything else held: releasing this one clears exactly its bit.
            let others: Vec<String> = flags
                .iter()
                .filter(|(other, _)| *other != name)
                .map(|(other, _)| format!(r#""{other}": true"#))
                .collect();
            let released = state(&format!("{{{}}}", others.join(",")));
            assert_eq!(released.button_mask(), all & !bit, "{name}");
        }
    }

    #[test]
    fn apply_does_not_keep_stale_buttons() {
        let mut report = XusbReport::default();
        report.apply(&state(r#"{"a": true, "b": true, "lx": 1}"#));
        assert_eq!(report.buttons, 0x3000);

        report.apply(&state(r#"{"y": true}"#));
        assert_eq!(report.buttons, 0x8000);
        assert_eq!(report.thumb_lx, 0);
    }

    #[test]
    fn left_stick_and_a() {
        let report = encode(&state(r#"{"lx": 1.0, "a": true}"#));
        assert_eq!(
            report,
            XusbReport {
                buttons: 0x1000,
                left_trigger: 0,
                right_trigger: 0,
                thumb_lx: 32767,
                thumb_ly: 0,
                thumb_rx: 0,
                thumb_ry: 0,
            }
        );
    }

    #[test]
    fn right_stick_and_dpad() {
        let report = encode(&state(r#"{"rx": -1.0, "dpadUp": true, "dpadLeft": true}"#));
        assert_eq!(
            report,
            XusbReport {
                buttons: 0x0005,
                thumb_rx: -32767,
                ..Default::default()
            }
        );
    }

    #[test]
    fn decoding_is_permissive() {
        let decoded = state(
            r#"{"lx": "0.5", "ly": null, "rx": [1], "ry": {"v": 1},
                "leftTrigger": true, "a": 1, "b": 0, "x": "yes", "y": "",
                "dpadUp": null, "session": "ignored"}"#,
        );
        assert_eq!(decoded.lx, 0.5);
        assert_eq!(decoded.ly, 0.0);
        assert_eq!(decoded.rx, 0.0);
        assert_eq!(decoded.ry, 0.0);
        assert_eq!(decoded.left_trigger, 1.0);
        assert!(decoded.a);
        assert!(!decoded.b);
        assert!(decoded.x);
        assert!(!decoded.y);
        assert!(!decoded.dpad_up);
    }

    #[test]
    fn numeric_strings_follow_number_coercion() {
        assert_eq!(state(r#"{"lx": " -0.25 "}"#).lx, -0.25);
        assert_eq!(state(r#"{"lx": "Infinity"}"#).lx, f64::INFINITY);
        assert_eq!(state(r#"{"lx": "-Infinity"}"#).lx, f64::NEG_INFINITY);
        for text in ["inf", "-inf", "infinity", "INFINITY", "NaN", "nan", ""] {
            let json = format!(r#"{{"lx": "{text}"}}"#);
            assert_eq!(state(&json).lx, 0.0, "{text}");
        }
        assert_eq!(encode(&state(r#"{"lx": "inf"}"#)).thumb_lx, 0);
        assert_eq!(encode(&state(r#"{"lx": "Infinity"}"#)).thumb_lx, 32767);
    }

    #[test]
    fn zero_and_missing_are_the_same() {
        assert_eq!(
            encode(&state(r#"{"lx": 0, "leftTrigger": 0}"#)),
            encode(&state("{}"))
        );
    }

    #[test]
    fn non_object_payloads_are_rejected() {
        for text in ["[0.5, 1]", "42", "\"lx\"", "null", "{not json"] {
            assert!(InputState::from_json(text).is_err(), "{text}");
        }
    }
}
