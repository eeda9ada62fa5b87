/**
 * APRS weather reports (`_` data type and the position-report weather
 * extension).
 *
 * Fields are single-letter keys followed by fixed-width numbers, with
 * dots standing in for missing digits:
 *
 * | key | field                  | unit           |
 * | --- | ---------------------- | -------------- |
 * | c   | wind direction         | degrees        |
 * | s   | sustained wind         | mph            |
 * | g   | gust                   | mph            |
 * | t   | temperature            | degrees F      |
 * | r   | rain, last hour        | 1/100 inch     |
 * | p   | rain, last 24 h        | 1/100 inch     |
 * | P   | rain since midnight    | 1/100 inch     |
 * | h   | humidity (00 = 100 %)  | percent        |
 * | b   | barometric pressure    | 1/10 millibar  |
 */
use libm::log;
use serde::{Deserialize, Serialize};

use super::AprsError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WeatherReport {
    /// Month/day/hour/minute stamp, kept as transmitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_mdhm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_direction_deg: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed_mph: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gust_mph: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_f: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rain_1h_in: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rain_24h_in: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rain_midnight_in: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity_pct: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure_mbar: Option<f64>,
    /// Computed from temperature and humidity when both are present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dew_point_f: Option<f64>,
    /// Trailing software/unit tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
}

impl WeatherReport {
    /// A positionless weather report: `_MDHM` then keyed fields.
    pub(crate) fn decode_positionless(
        body: &[u8],
    ) -> Result<Self, AprsError> {
        if body.len() < 8 {
            return Err(AprsError::Truncated { expected: 8 });
        }
        let (timestamp, rest) = if body[..8].iter().all(u8::is_ascii_digit) {
            (
                Some(String::from_utf8_lossy(&body[..8]).to_string()),
                &body[8..],
            )
        } else {
            (None, body)
        };
        let mut report = Self::decode_fields(rest);
        report.timestamp_mdhm = timestamp;
        Ok(report)
    }

    /// The keyed fields alone, as found after a position's course/speed
    /// extension on a `!`/`=`/`/`/`@` weather report.
    pub fn decode_fields(bytes: &[u8]) -> Self {
        let mut report = WeatherReport::default();
        let mut i = 0;
        while i < bytes.len() {
            let key = bytes[i];
            let width = match key {
                b'c' | b's' | b'g' | b't' | b'r' | b'p' | b'P' => 3,
                b'h' => 2,
                b'b' => 5,
                // Snowfall and luminosity keys are accepted and skipped.
                b'l' | b'L' | b'S' => 3,
                _ => break,
            };
            let Some(field) = bytes.get(i + 1..i + 1 + width) else {
                break;
            };
            let value = numeric(field);
            match key {
                b'c' => report.wind_direction_deg = value.map(|v| v as u16),
                b's' => report.wind_speed_mph = value,
                b'g' => report.gust_mph = value,
                b't' => report.temperature_f = value,
                b'r' => report.rain_1h_in = value.map(|v| v / 100.0),
                b'p' => report.rain_24h_in = value.map(|v| v / 100.0),
                b'P' => report.rain_midnight_in = value.map(|v| v / 100.0),
                b'h' => {
                    report.humidity_pct = value.map(|v| {
                        // 00 encodes 100 %
                        if v == 0.0 {
                            100
                        } else {
                            v as u8
                        }
                    })
                }
                b'b' => report.pressure_mbar = value.map(|v| v / 10.0),
                _ => {}
            }
            i += 1 + width;
        }
        let tail = String::from_utf8_lossy(&bytes[i..]).trim().to_string();
        if !tail.is_empty() {
            report.software = Some(tail);
        }
        report.dew_point_f = dew_point(
            report.temperature_f,
            report.humidity_pct,
        );
        report
    }

    /// True when any measured field is present.
    pub fn has_data(&self) -> bool {
        self.wind_direction_deg.is_some()
            || self.wind_speed_mph.is_some()
            || self.gust_mph.is_some()
            || self.temperature_f.is_some()
            || self.rain_1h_in.is_some()
            || self.rain_24h_in.is_some()
            || self.rain_midnight_in.is_some()
            || self.humidity_pct.is_some()
            || self.pressure_mbar.is_some()
    }
}

/// Fixed-width numeric field; dots (or spaces) mean "not measured".
fn numeric(field: &[u8]) -> Option<f64> {
    if field.iter().any(|&b| b == b'.' || b == b' ') {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// Magnus-formula dew point, degrees Fahrenheit.
fn dew_point(temperature_f: Option<f64>, humidity: Option<u8>) -> Option<f64> {
    const B: f64 = 17.62;
    const C: f64 = 243.12;
    let t_c = (temperature_f? - 32.0) / 1.8;
    let rh = humidity? as f64;
    if rh <= 0.0 {
        return None;
    }
    let gamma = log(rh / 100.0) + B * t_c / (C + t_c);
    let dew_c = C * gamma / (B - gamma);
    Some(dew_c * 1.8 + 32.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn positionless_report() {
        let report = WeatherReport::decode_positionless(
            b"10090556c220s004g005t077r000p000P000h50b09900wRSW",
        )
        .unwrap();
        assert_eq!(report.timestamp_mdhm.as_deref(), Some("10090556"));
        assert_eq!(report.wind_direction_deg, Some(220));
        assert_eq!(report.wind_speed_mph, Some(4.0));
        assert_eq!(report.gust_mph, Some(5.0));
        assert_eq!(report.temperature_f, Some(77.0));
        assert_eq!(report.rain_1h_in, Some(0.0));
        assert_eq!(report.humidity_pct, Some(50));
        assert_relative_eq!(report.pressure_mbar.unwrap(), 990.0);
        assert_eq!(report.software.as_deref(), Some("wRSW"));
    }

    #[test]
    fn missing_fields_are_dots() {
        let report = WeatherReport::decode_positionless(
            b"10090556c...s...g...t077h00b.....",
        )
        .unwrap();
        assert_eq!(report.wind_direction_deg, None);
        assert_eq!(report.temperature_f, Some(77.0));
        // humidity 00 encodes 100 %
        assert_eq!(report.humidity_pct, Some(100));
        assert_eq!(report.pressure_mbar, None);
    }

    #[test]
    fn negative_temperature() {
        let report =
            WeatherReport::decode_positionless(b"10090556t-01h90").unwrap();
        assert_eq!(report.temperature_f, Some(-1.0));
    }

    #[test]
    fn dew_point_magnus() {
        // 77 F / 25 C at 50 % RH: dew point close to 13.85 C / 56.9 F.
        let report = WeatherReport::decode_positionless(
            b"10090556t077h50",
        )
        .unwrap();
        assert_relative_eq!(
            report.dew_point_f.unwrap(),
            56.9,
            max_relative = 1e-2
        );
        // Saturated air: dew point equals the temperature.
        let report =
            WeatherReport::decode_positionless(b"10090556t068h00").unwrap();
        assert_relative_eq!(
            report.dew_point_f.unwrap(),
            68.0,
            max_relative = 1e-6
        );
    }

    #[test]
    fn truncated() {
        assert!(WeatherReport::decode_positionless(b"1009").is_err());
    }
}
