/**
 * Mic-E decoding.
 *
 * Mic-E squeezes a full position report into 9 information bytes by
 * abusing the destination address: each of its six callsign characters
 * encodes one latitude digit plus, in specific positions, the N/S flag,
 * the +100 degree longitude offset, the E/W flag and one of three message
 * bits. The information field then carries longitude, speed, course and
 * symbol in offset-binary bytes.
 *
 * Trailing bytes are noisy in real traffic: an optional base-91 altitude
 * (three bytes then `}`), an optional radio-model suffix, and free text.
 * Anything we cannot attribute stays in the comment.
 */
use serde::Serialize;

use super::position::{validate, PositionReport};
use super::AprsError;
use crate::ax25::Callsign;
use crate::data::tocalls;

/// What a Mic-E frame carries beyond the position proper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MicEExtras {
    /// Station message code, e.g. "En Route" or "Custom-3".
    pub message: String,
    /// Radio model inferred from the comment prefix/suffix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

const STANDARD_MESSAGES: [&str; 8] = [
    "Emergency",
    "Priority",
    "Special",
    "Committed",
    "Returning",
    "In Service",
    "En Route",
    "Off Duty",
];

/// One destination character: a latitude digit plus a flag bit, with the
/// flag meaning message bit, N/S, longitude offset or E/W by position.
fn destination_char(c: u8) -> Result<(u8, bool, bool), AprsError> {
    // (digit, bit, custom)
    match c {
        b'0'..=b'9' => Ok((c - b'0', false, false)),
        b'A'..=b'J' => Ok((c - b'A', true, true)),
        b'K' => Ok((0, true, true)),
        b'L' => Ok((0, false, false)),
        b'P'..=b'Y' => Ok((c - b'P', true, false)),
        b'Z' => Ok((0, true, false)),
        _ => Err(AprsError::BadMicE(format!(
            "invalid destination character {:?}",
            c as char
        ))),
    }
}

pub(crate) fn decode(
    destination: &Callsign,
    body: &[u8],
    current: bool,
) -> Result<PositionReport, AprsError> {
    let dest = destination.base().as_bytes();
    if dest.len() != 6 {
        return Err(AprsError::BadMicE("destination not 6 characters".into()));
    }
    if body.len() < 8 {
        return Err(AprsError::Truncated { expected: 9 });
    }

    let mut digits = [0u8; 6];
    let mut bits = [false; 6];
    let mut custom = false;
    for (i, &c) in dest.iter().enumerate() {
        let (digit, bit, is_custom) = destination_char(c)?;
        digits[i] = digit;
        bits[i] = bit;
        custom = custom || (is_custom && i < 3);
    }

    let message_code =
        (bits[0] as usize) << 2 | (bits[1] as usize) << 1 | bits[2] as usize;
    let message = if message_code == 0 {
        "Emergency".to_string()
    } else if custom {
        format!("Custom-{message_code}")
    } else {
        STANDARD_MESSAGES[message_code].to_string()
    };

    let lat_degrees = (digits[0] * 10 + digits[1]) as f64;
    let lat_minutes = (digits[2] * 10 + digits[3]) as f64
        + (digits[4] * 10 + digits[5]) as f64 / 100.0;
    let mut latitude = lat_degrees + lat_minutes / 60.0;
    if !bits[3] {
        latitude = -latitude;
    }

    // Longitude: degrees, minutes, hundredths, each offset by 28.
    let mut d = body[0] as i32 - 28;
    if bits[4] {
        d += 100;
    }
    if (180..=189).contains(&d) {
        d -= 80;
    } else if (190..=199).contains(&d) {
        d -= 190;
    }
    let mut m = body[1] as i32 - 28;
    if m >= 60 {
        m -= 60;
    }
    let h = body[2] as i32 - 28;
    if !(0..=179).contains(&d) || !(0..60).contains(&m) || !(0..100).contains(&h)
    {
        return Err(AprsError::BadMicE("longitude bytes out of range".into()));
    }
    let mut longitude = d as f64 + (m as f64 + h as f64 / 100.0) / 60.0;
    if bits[5] {
        longitude = -longitude;
    }
    validate(latitude, longitude)?;

    // Speed and course, offset-binary packed over three bytes.
    let sp = body[3] as i32 - 28;
    let dc = body[4] as i32 - 28;
    let se = body[5] as i32 - 28;
    let (speed_knots, course_deg) =
        if (0..=97).contains(&sp) && (0..=97).contains(&dc) && se >= 0 {
            let mut speed = sp * 10 + dc / 10;
            if speed >= 800 {
                speed -= 800;
            }
            let mut course = (dc % 10) * 100 + se;
            if course >= 400 {
                course -= 400;
            }
            if course <= 360 {
                (Some(speed as f64), Some((course % 360) as u16))
            } else {
                (None, None)
            }
        } else {
            (None, None)
        };

    let symbol_code = body[6] as char;
    let symbol_table = body.get(7).map(|&b| b as char).unwrap_or('/');

    let (altitude_ft, device, comment) = decode_tail(&body[8..]);

    Ok(PositionReport {
        timestamp: None,
        latitude,
        longitude,
        symbol_table,
        symbol_code,
        messaging: true,
        course_deg,
        speed_knots,
        altitude_ft,
        range_miles: None,
        mice: Some(MicEExtras {
            message: if current {
                message
            } else {
                format!("{message} (old)")
            },
            device,
        }),
        comment,
    })
}

/// Trailing bytes, in prefix order: altitude (`xxx}`, base-91 meters above
/// -10 km), then a device suffix, then free text. Unknown bytes are
/// comment, never an error.
fn decode_tail(tail: &[u8]) -> (Option<i32>, Option<String>, String) {
    let mut rest = tail;
    let mut device = None;

    // Kenwood radios prefix the comment with one type byte.
    if let Some((&first, more)) = rest.split_first() {
        if let Some(name) = tocalls::mice_prefix_device(first as char) {
            device = Some(name.to_string());
            rest = more;
        }
    }

    let mut altitude_ft = None;
    if rest.len() >= 4 && rest[3] == b'}' {
        let valid = rest[..3].iter().all(|&b| (33..124).contains(&b));
        if valid {
            let meters = rest[..3]
                .iter()
                .fold(0i32, |acc, &b| acc * 91 + (b as i32 - 33))
                - 10_000;
            altitude_ft = Some((meters as f64 * 3.28084).round() as i32);
            rest = &rest[4..];
        }
    }

    let mut comment = String::from_utf8_lossy(rest).to_string();
    if device.is_none() {
        if let Some((name, trimmed)) = tocalls::mice_suffix_device(&comment) {
            device = Some(name.to_string());
            comment = trimmed;
        }
    }
    (altitude_ft, device, comment.trim().to_string())
}
