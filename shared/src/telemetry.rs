//! Telemetry Decoder
//!
//! Decodes the fixed-format ASCII status line relayed by the intermediary:
//!
//! ```text
//! pitch:<int>;roll:<int>;yaw:<int>;vgx:<int>;vgy<int>;vgz:<int>;templ:<int>;temph:<int>;
//! tof:<uint>;h:<uint>;bat:<uint>;baro:<float>;time:<uint>;agx:<float>;agy:<float>;agz:<float>;
//! ```
//!
//! `vgy` is followed by its value with no colon. This is how the drone emits
//! it and is matched literally. Spaces are allowed after a key and before the
//! next key (`baro: 101.3; time:5`); any other deviation fails the whole line.

use serde::Serialize;
use thiserror::Error;

/// Field label for problems after the last field
pub const END_OF_RECORD: &str = "<end>";

/// Errors that can occur while decoding a telemetry line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Malformed telemetry at `{field}`: {reason}")]
    MalformedTelemetry { field: &'static str, reason: String },
}

impl TelemetryError {
    fn at(field: &'static str, reason: impl Into<String>) -> Self {
        TelemetryError::MalformedTelemetry {
            field,
            reason: reason.into(),
        }
    }
}

/// Decoded telemetry snapshot, including derived quantities
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroneState {
    pub pitch: i32,
    pub roll: i32,
    pub yaw: i32,
    pub speed_x: i32,
    pub speed_y: i32,
    pub speed_z: i32,
    pub total_speed: f64,
    pub temp_low: i32,
    pub temp_high: i32,
    pub average_temperature: f64,
    pub time_of_flight: u32,
    pub height: u32,
    pub battery_percentage: u32,
    pub barometer: f64,
    pub time: u32,
    pub acceleration_x: f64,
    pub acceleration_y: f64,
    pub acceleration_z: f64,
    pub total_acceleration: f64,
}

impl DroneState {
    /// Decode a raw telemetry line. Partial records are never produced.
    pub fn decode(line: &str) -> Result<Self, TelemetryError> {
        decode(line)
    }
}

/// Decode a raw telemetry line into a [`DroneState`]
pub fn decode(line: &str) -> Result<DroneState, TelemetryError> {
    let mut fields = FieldReader::new(line);

    let pitch = fields.int("pitch:")?;
    let roll = fields.int("roll:")?;
    let yaw = fields.int("yaw:")?;
    let speed_x = fields.int("vgx:")?;
    let speed_y = fields.int("vgy")?;
    let speed_z = fields.int("vgz:")?;
    let temp_low = fields.int("templ:")?;
    let temp_high = fields.int("temph:")?;
    let time_of_flight = fields.uint("tof:")?;
    let height = fields.uint("h:")?;
    let battery_percentage = fields.uint("bat:")?;
    let barometer = fields.float("baro:")?;
    let time = fields.uint("time:")?;
    let acceleration_x = fields.float("agx:")?;
    let acceleration_y = fields.float("agy:")?;
    let acceleration_z = fields.float("agz:")?;
    fields.finish()?;

    Ok(DroneState {
        pitch,
        roll,
        yaw,
        speed_x,
        speed_y,
        speed_z,
        total_speed: magnitude(speed_x as f64, speed_y as f64, speed_z as f64),
        temp_low,
        temp_high,
        average_temperature: (temp_low as f64 + temp_high as f64) / 2.0,
        time_of_flight,
        height,
        battery_percentage,
        barometer,
        time,
        acceleration_x,
        acceleration_y,
        acceleration_z,
        total_acceleration: magnitude(acceleration_x, acceleration_y, acceleration_z),
    })
}

fn magnitude(x: f64, y: f64, z: f64) -> f64 {
    (x * x + y * y + z * z).sqrt()
}

/// Single-pass positional reader over `key value ;` triples
struct FieldReader<'a> {
    rest: &'a str,
}

impl<'a> FieldReader<'a> {
    fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    /// Consume `key`, optional spaces, the value and its `;` terminator
    fn value(&mut self, key: &'static str) -> Result<&'a str, TelemetryError> {
        let rest = self.rest.trim_start_matches(' ');
        let rest = rest
            .strip_prefix(key)
            .ok_or_else(|| TelemetryError::at(key, "expected field"))?;
        let rest = rest.trim_start_matches(' ');

        let end = rest
            .find(';')
            .ok_or_else(|| TelemetryError::at(key, "missing `;` terminator"))?;
        let (raw, tail) = rest.split_at(end);
        self.rest = &tail[1..];

        if raw.is_empty() {
            return Err(TelemetryError::at(key, "empty value"));
        }
        Ok(raw)
    }

    fn int(&mut self, key: &'static str) -> Result<i32, TelemetryError> {
        let raw = self.value(key)?;
        raw.parse::<i32>()
            .map_err(|e| TelemetryError::at(key, format!("`{raw}` is not an integer: {e}")))
    }

    fn uint(&mut self, key: &'static str) -> Result<u32, TelemetryError> {
        let raw = self.value(key)?;
        raw.parse::<u32>().map_err(|e| {
            TelemetryError::at(key, format!("`{raw}` is not an unsigned integer: {e}"))
        })
    }

    fn float(&mut self, key: &'static str) -> Result<f64, TelemetryError> {
        let raw = self.value(key)?;
        if !is_decimal(raw) {
            return Err(TelemetryError::at(key, format!("`{raw}` is not a decimal number")));
        }
        raw.parse::<f64>()
            .map_err(|e| TelemetryError::at(key, format!("`{raw}` is not a decimal number: {e}")))
    }

    /// Only trailing whitespace (e.g. `\r\n`) may follow the last field
    fn finish(self) -> Result<(), TelemetryError> {
        if self.rest.trim().is_empty() {
            Ok(())
        } else {
            Err(TelemetryError::at(END_OF_RECORD, format!("unexpected trailing data `{}`", self.rest)))
        }
    }
}

/// `[+-]?digits[.digits]` or `[+-]?.digits`; rejects `inf`, `NaN` and exponents
fn is_decimal(raw: &str) -> bool {
    let unsigned = raw.strip_prefix(['-', '+']).unwrap_or(raw);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

    match frac_part {
        Some(frac) => {
            all_digits(int_part)
                && all_digits(frac)
                && !(int_part.is_empty() && frac.is_empty())
        }
        None => !int_part.is_empty() && all_digits(int_part),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "pitch:0;roll:0;yaw:0;vgx:0;vgy0;vgz:0;templ:60;temph:70;tof:10;h:100;bat:85;baro: 101.3; time:5;agx:0.0;agy:0.0;agz:-1000.0;";

    #[test]
    fn test_decode_sample_line() {
        let state = decode(SAMPLE).expect("sample should decode");
        assert_eq!(state.battery_percentage, 85);
        assert_eq!(state.average_temperature, 65.0);
        assert_eq!(state.total_acceleration, 1000.0);
        assert_eq!(state.total_speed, 0.0);
        assert_eq!(state.barometer, 101.3);
        assert_eq!(state.time, 5);
        assert_eq!(state.height, 100);
        assert_eq!(state.time_of_flight, 10);
    }

    #[test]
    fn test_derived_quantities() {
        let line = "pitch:-3;roll:2;yaw:-170;vgx:3;vgy-4;vgz:12;templ:61;temph:64;tof:42;h:30;bat:50;baro:99.25;time:17;agx:-12.00;agy:4.00;agz:-3.00;\r\n";
        let state = DroneState::decode(line).expect("line should decode");

        assert_eq!(state.pitch, -3);
        assert_eq!(state.yaw, -170);
        assert_eq!(state.speed_y, -4);
        assert_eq!(state.total_speed, (3f64 * 3.0 + 4.0 * 4.0 + 12.0 * 12.0).sqrt());
        assert_eq!(state.total_speed, 13.0);
        assert_eq!(state.average_temperature, 62.5);
        assert_eq!(state.total_acceleration, 13.0);
    }

    #[test]
    fn test_missing_field_fails() {
        let line = SAMPLE.replace("bat:85;", "");
        let err = decode(&line).unwrap_err();
        assert!(matches!(err, TelemetryError::MalformedTelemetry { field: "bat:", .. }));
    }

    #[test]
    fn test_vgy_with_colon_is_rejected() {
        let line = SAMPLE.replace("vgy0", "vgy:0");
        let err = decode(&line).unwrap_err();
        assert!(matches!(err, TelemetryError::MalformedTelemetry { field: "vgy", .. }));
    }

    #[test]
    fn test_reordered_fields_fail() {
        let line = SAMPLE.replace("pitch:0;roll:0;", "roll:0;pitch:0;");
        assert!(decode(&line).is_err());
    }

    #[test]
    fn test_non_numeric_values_fail() {
        assert!(decode(&SAMPLE.replace("bat:85", "bat:high")).is_err());
        assert!(decode(&SAMPLE.replace("bat:85", "bat:-5")).is_err());
        assert!(decode(&SAMPLE.replace("agx:0.0", "agx:NaN")).is_err());
        assert!(decode(&SAMPLE.replace("agx:0.0", "agx:1e3")).is_err());
        assert!(decode(&SAMPLE.replace("pitch:0", "pitch:")).is_err());
    }

    #[test]
    fn test_extra_field_fails() {
        let line = format!("{SAMPLE}mpry:0,0,0;");
        let err = decode(&line).unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::MalformedTelemetry { field: END_OF_RECORD, .. }
        ));
        assert!(err.to_string().contains("mpry:0,0,0;"));
    }

    #[test]
    fn test_truncated_line_fails() {
        let line = &SAMPLE[..SAMPLE.len() - 1];
        assert!(decode(line).is_err());
        assert!(decode("").is_err());
    }

    #[test]
    fn test_is_decimal() {
        assert!(is_decimal("101.3"));
        assert!(is_decimal("-1000.0"));
        assert!(is_decimal("7"));
        assert!(is_decimal(".5"));
        assert!(!is_decimal("."));
        assert!(!is_decimal("-"));
        assert!(!is_decimal("inf"));
        assert!(!is_decimal("1.2.3"));
    }
}
