/**
 * APRS payload decoding.
 *
 * Every APRS transmission is the information field of an AX.25 UI frame
 * with PID 0xF0; the first byte selects the data type. [`AprsData::decode`]
 * dispatches on it and returns a tagged variant. Unknown types are kept as
 * [`AprsData::Unknown`] rather than an error, since the channel carries
 * plenty of traffic we have no business rejecting.
 */
pub mod message;
pub mod mice;
pub mod position;
pub mod telemetry;
pub mod weather;

use serde::Serialize;
use thiserror::Error;

use crate::ax25::{Callsign, Frame};
use message::AprsMessage;
use position::PositionReport;
use telemetry::TelemetryReport;
use weather::WeatherReport;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum AprsError {
    #[error("payload truncated, expected at least {expected} bytes")]
    Truncated { expected: usize },
    #[error("invalid position: {0}")]
    BadPosition(String),
    #[error("position is Null Island")]
    NullIsland,
    #[error("latitude or longitude out of range")]
    OutOfRange,
    #[error("invalid Mic-E encoding: {0}")]
    BadMicE(String),
    #[error("invalid message block")]
    BadMessage,
    #[error("invalid third-party header")]
    BadThirdParty,
    #[error("third-party recursion")]
    ThirdPartyRecursion,
}

/// An APRS timestamp, kept as transmitted: either day/hour/minute (zulu or
/// local) or hour/minute/second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AprsTimestamp {
    DayHoursMinutes { day: u8, hour: u8, minute: u8, zulu: bool },
    HoursMinutesSeconds { hour: u8, minute: u8, second: u8 },
}

impl AprsTimestamp {
    /// Seven bytes: `DDHHMMz`, `DDHHMM/` or `HHMMSSh`.
    pub fn parse(bytes: &[u8]) -> Option<(Self, usize)> {
        let chunk = bytes.get(..7)?;
        if !chunk[..6].iter().all(u8::is_ascii_digit) {
            return None;
        }
        let d = |i: usize| (chunk[i] - b'0') * 10 + (chunk[i + 1] - b'0');
        let ts = match chunk[6] {
            b'z' => AprsTimestamp::DayHoursMinutes {
                day: d(0),
                hour: d(2),
                minute: d(4),
                zulu: true,
            },
            b'/' => AprsTimestamp::DayHoursMinutes {
                day: d(0),
                hour: d(2),
                minute: d(4),
                zulu: false,
            },
            b'h' => AprsTimestamp::HoursMinutesSeconds {
                hour: d(0),
                minute: d(2),
                second: d(4),
            },
            _ => return None,
        };
        Some((ts, 7))
    }
}

/// A status report (`>`), with an optional timestamp and an optional
/// Maidenhead locator leading the text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<AprsTimestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<String>,
    pub text: String,
}

impl StatusReport {
    fn decode(body: &[u8]) -> Self {
        let (timestamp, consumed) = match AprsTimestamp::parse(body) {
            // Status timestamps are zulu DDHHMM only.
            Some((ts @ AprsTimestamp::DayHoursMinutes { zulu: true, .. }, n)) => {
                (Some(ts), n)
            }
            _ => (None, 0),
        };
        let rest = &body[consumed..];
        let (grid, rest) = match position::leading_grid(rest) {
            Some((grid, consumed)) => (Some(grid), &rest[consumed..]),
            None => (None, rest),
        };
        StatusReport {
            timestamp,
            grid,
            text: String::from_utf8_lossy(rest).trim().to_string(),
        }
    }
}

/// A third-party (`}`) envelope: an inner packet tunneled through us,
/// usually by an iGate. Never forwarded back to RF and never counted as a
/// direct reception.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThirdParty {
    pub source: Callsign,
    pub destination: Callsign,
    pub path: Vec<String>,
    pub data: Box<AprsData>,
}

impl ThirdParty {
    fn decode(body: &[u8], depth: u8) -> Result<Self, AprsError> {
        if depth > 0 {
            return Err(AprsError::ThirdPartyRecursion);
        }
        let colon = body
            .iter()
            .position(|&b| b == b':')
            .ok_or(AprsError::BadThirdParty)?;
        let header = std::str::from_utf8(&body[..colon])
            .map_err(|_| AprsError::BadThirdParty)?;
        let info = &body[colon + 1..];

        let (source, rest) =
            header.split_once('>').ok_or(AprsError::BadThirdParty)?;
        let mut hops = rest.split(',');
        let destination = hops.next().ok_or(AprsError::BadThirdParty)?;
        let source: Callsign =
            source.parse().map_err(|_| AprsError::BadThirdParty)?;
        let destination: Callsign =
            destination.parse().map_err(|_| AprsError::BadThirdParty)?;
        let path: Vec<String> = hops.map(str::to_string).collect();

        let data = AprsData::decode_inner(info, &destination, depth + 1)?;
        Ok(ThirdParty {
            source,
            destination,
            path,
            data: Box::new(data),
        })
    }
}

/// The decoded information field of an APRS UI frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AprsData {
    Position(PositionReport),
    Object(position::ObjectReport),
    Item(position::ItemReport),
    Message(AprsMessage),
    Status(StatusReport),
    Telemetry(TelemetryReport),
    Weather(WeatherReport),
    ThirdParty(ThirdParty),
    /// A data type we do not interpret; raw payload preserved.
    Unknown { raw: String },
}

impl AprsData {
    /// Decode the information field of `frame`. The destination address is
    /// part of the Mic-E encoding, hence the full frame.
    pub fn decode(frame: &Frame) -> Result<Self, AprsError> {
        Self::decode_inner(&frame.info, &frame.destination.callsign, 0)
    }

    fn decode_inner(
        info: &[u8],
        destination: &Callsign,
        depth: u8,
    ) -> Result<Self, AprsError> {
        let Some(&dti) = info.first() else {
            return Err(AprsError::Truncated { expected: 1 });
        };
        let body = &info[1..];
        Ok(match dti {
            b'!' | b'=' => AprsData::Position(PositionReport::decode(
                body,
                dti == b'=',
                false,
            )?),
            b'/' | b'@' => AprsData::Position(PositionReport::decode(
                body,
                dti == b'@',
                true,
            )?),
            b';' => AprsData::Object(position::ObjectReport::decode(body)?),
            b')' => AprsData::Item(position::ItemReport::decode(body)?),
            b':' => AprsData::Message(AprsMessage::decode(body)?),
            b'>' => AprsData::Status(StatusReport::decode(body)),
            b'T' => AprsData::Telemetry(TelemetryReport::decode(body)?),
            b'_' => AprsData::Weather(WeatherReport::decode_positionless(body)?),
            b'`' | b'\'' => AprsData::Position(mice::decode(
                destination,
                body,
                dti == b'`',
            )?),
            b'}' => AprsData::ThirdParty(ThirdParty::decode(body, depth)?),
            _ => AprsData::Unknown {
                raw: String::from_utf8_lossy(info).to_string(),
            },
        })
    }
}

/// Human-readable name for the common symbol codes, for display surfaces.
pub fn symbol_name(table: char, code: char) -> Option<&'static str> {
    let name = match (table, code) {
        ('/', '!') => "police",
        ('/', '#') => "digipeater",
        ('/', '$') => "phone",
        ('/', '-') => "house",
        ('/', '>') => "car",
        ('/', 'O') => "balloon",
        ('/', 'W') => "weather station",
        ('/', 'Y') => "yacht",
        ('/', '[') => "person",
        ('/', '_') => "weather station",
        ('/', 'b') => "bicycle",
        ('/', 'j') => "jeep",
        ('/', 'k') => "truck",
        ('/', 'r') => "repeater",
        ('/', 's') => "ship",
        ('/', 'u') => "semi truck",
        ('/', 'v') => "van",
        ('/', 'y') => "yagi at qth",
        ('\\', '#') => "digipeater (overlay)",
        ('\\', '&') => "gateway",
        ('\\', '-') => "house (hf)",
        ('\\', '_') => "weather site",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ax25::Frame;

    fn ui(dest: &str, info: &[u8]) -> Frame {
        Frame::ui(
            "N0CALL".parse().unwrap(),
            dest.parse().unwrap(),
            vec![],
            info.to_vec(),
        )
    }

    #[test]
    fn dispatch_position() {
        let frame = ui("APRS", b"!4237.14N/07107.45W-Testing");
        assert!(matches!(
            AprsData::decode(&frame).unwrap(),
            AprsData::Position(_)
        ));
    }

    #[test]
    fn dispatch_unknown_kept() {
        let frame = ui("APRS", b"?APRS?");
        match AprsData::decode(&frame).unwrap() {
            AprsData::Unknown { raw } => assert_eq!(raw, "?APRS?"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn timestamp_forms() {
        assert_eq!(
            AprsTimestamp::parse(b"092345z"),
            Some((
                AprsTimestamp::DayHoursMinutes {
                    day: 9,
                    hour: 23,
                    minute: 45,
                    zulu: true
                },
                7
            ))
        );
        assert_eq!(
            AprsTimestamp::parse(b"234517h"),
            Some((
                AprsTimestamp::HoursMinutesSeconds {
                    hour: 23,
                    minute: 45,
                    second: 17
                },
                7
            ))
        );
        assert_eq!(AprsTimestamp::parse(b"4237.14"), None);
        assert_eq!(AprsTimestamp::parse(b"0923"), None);
    }

    #[test]
    fn status_with_grid() {
        let frame = ui("APRS", b">IO91SX/- Operating from the hill");
        match AprsData::decode(&frame).unwrap() {
            AprsData::Status(status) => {
                assert_eq!(status.grid.as_deref(), Some("IO91SX"));
                assert_eq!(status.text, "Operating from the hill");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_with_timestamp() {
        let frame = ui("APRS", b">092345zNet control tonight");
        match AprsData::decode(&frame).unwrap() {
            AprsData::Status(status) => {
                assert!(status.timestamp.is_some());
                assert_eq!(status.text, "Net control tonight");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn third_party_strips_and_recurses() {
        let frame = ui(
            "APRS",
            b"}K1ABC-9>APRS,TCPIP,N0GATE*::N0CALL   :hi there{001",
        );
        match AprsData::decode(&frame).unwrap() {
            AprsData::ThirdParty(tp) => {
                assert_eq!(tp.source.to_string(), "K1ABC-9");
                assert_eq!(tp.path, vec!["TCPIP", "N0GATE*"]);
                assert!(matches!(*tp.data, AprsData::Message(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn third_party_recursion_bounded() {
        let frame =
            ui("APRS", b"}K1ABC>APRS:}K2DEF>APRS::N0CALL   :too deep");
        assert_eq!(
            AprsData::decode(&frame),
            Err(AprsError::ThirdPartyRecursion)
        );
    }
}
