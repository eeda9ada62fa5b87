/**
 * APRS position reports.
 *
 * Three encodings reach us: the human-readable `DDMM.mmN/DDDMM.mmE` form,
 * the base-91 compressed form, and Mic-E (decoded in [`super::mice`], which
 * also lands here as a [`PositionReport`]). Objects and items wrap a
 * position in a name.
 *
 * The pair (0.0, 0.0) is synthetic ("Null Island") and always rejected,
 * as are coordinates outside [-90, 90] x [-180, 180].
 */
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::{AprsError, AprsTimestamp};

/// Base-91 digits start at '!' (33).
const BASE91_OFFSET: u32 = 33;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<AprsTimestamp>,
    pub latitude: f64,
    pub longitude: f64,
    pub symbol_table: char,
    pub symbol_code: char,
    /// True when the station announced messaging capability (`=`/`@`).
    pub messaging: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_deg: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_knots: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_ft: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_miles: Option<f64>,
    /// Mic-E message code and device, when decoded from a Mic-E frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mice: Option<super::mice::MicEExtras>,
    pub comment: String,
}

impl PositionReport {
    pub(crate) fn decode(
        body: &[u8],
        messaging: bool,
        has_timestamp: bool,
    ) -> Result<Self, AprsError> {
        let (timestamp, consumed) = if has_timestamp {
            let (ts, n) = AprsTimestamp::parse(body)
                .ok_or(AprsError::BadPosition("bad timestamp".into()))?;
            (Some(ts), n)
        } else {
            (None, 0)
        };
        let body = &body[consumed..];
        let mut report = match body.first() {
            Some(b) if b.is_ascii_digit() || *b == b' ' => {
                decode_uncompressed(body)?
            }
            Some(_) => decode_compressed(body)?,
            None => return Err(AprsError::Truncated { expected: 13 }),
        };
        report.timestamp = timestamp;
        report.messaging = messaging;
        validate(report.latitude, report.longitude)?;
        Ok(report)
    }

    /// Encode as an uncompressed report, the format beacons use. The
    /// timestamp is not emitted; `!`/`=` track the messaging flag.
    pub fn encode_uncompressed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.comment.len());
        out.push(if self.messaging { b'=' } else { b'!' });
        out.extend_from_slice(encode_latitude(self.latitude).as_bytes());
        out.push(self.symbol_table as u8);
        out.extend_from_slice(encode_longitude(self.longitude).as_bytes());
        out.push(self.symbol_code as u8);
        if let (Some(course), Some(speed)) = (self.course_deg, self.speed_knots)
        {
            out.extend_from_slice(
                format!("{:03}/{:03}", course, speed.round() as u32).as_bytes(),
            );
        }
        if let Some(altitude) = self.altitude_ft {
            out.extend_from_slice(format!("/A={altitude:06}").as_bytes());
        }
        out.extend_from_slice(self.comment.as_bytes());
        out
    }
}

pub(crate) fn validate(latitude: f64, longitude: f64) -> Result<(), AprsError> {
    if latitude == 0.0 && longitude == 0.0 {
        return Err(AprsError::NullIsland);
    }
    if !(-90.0..=90.0).contains(&latitude)
        || !(-180.0..=180.0).contains(&longitude)
    {
        return Err(AprsError::OutOfRange);
    }
    Ok(())
}

/// `DDMM.mmN` (8 bytes). Position ambiguity replaces trailing digits with
/// spaces; they read as zero.
fn parse_latitude(bytes: &[u8]) -> Result<f64, AprsError> {
    if bytes.len() != 8 || bytes[4] != b'.' {
        return Err(AprsError::BadPosition("malformed latitude".into()));
    }
    let hemisphere = match bytes[7] {
        b'N' => 1.0,
        b'S' => -1.0,
        _ => return Err(AprsError::BadPosition("bad hemisphere".into())),
    };
    let degrees = ascii_number(&bytes[..2])?;
    let minutes = ascii_number(&bytes[2..4])?
        + ascii_number(&bytes[5..7])? / 100.0;
    Ok(hemisphere * (degrees + minutes / 60.0))
}

/// `DDDMM.mmW` (9 bytes).
fn parse_longitude(bytes: &[u8]) -> Result<f64, AprsError> {
    if bytes.len() != 9 || bytes[5] != b'.' {
        return Err(AprsError::BadPosition("malformed longitude".into()));
    }
    let hemisphere = match bytes[8] {
        b'E' => 1.0,
        b'W' => -1.0,
        _ => return Err(AprsError::BadPosition("bad hemisphere".into())),
    };
    let degrees = ascii_number(&bytes[..3])?;
    let minutes = ascii_number(&bytes[3..5])?
        + ascii_number(&bytes[6..8])? / 100.0;
    Ok(hemisphere * (degrees + minutes / 60.0))
}

fn ascii_number(bytes: &[u8]) -> Result<f64, AprsError> {
    let mut value = 0.0;
    for &b in bytes {
        let digit = match b {
            b'0'..=b'9' => (b - b'0') as f64,
            // position ambiguity
            b' ' => 0.0,
            _ => {
                return Err(AprsError::BadPosition(
                    "non-digit in coordinate".into(),
                ))
            }
        };
        value = value * 10.0 + digit;
    }
    Ok(value)
}

fn encode_latitude(latitude: f64) -> String {
    let hemisphere = if latitude < 0.0 { 'S' } else { 'N' };
    let degrees = latitude.abs().floor();
    let minutes = (latitude.abs() - degrees) * 60.0;
    format!("{:02}{:05.2}{}", degrees as u32, minutes, hemisphere)
}

fn encode_longitude(longitude: f64) -> String {
    let hemisphere = if longitude < 0.0 { 'W' } else { 'E' };
    let degrees = longitude.abs().floor();
    let minutes = (longitude.abs() - degrees) * 60.0;
    format!("{:03}{:05.2}{}", degrees as u32, minutes, hemisphere)
}

fn decode_uncompressed(body: &[u8]) -> Result<PositionReport, AprsError> {
    if body.len() < 19 {
        return Err(AprsError::Truncated { expected: 19 });
    }
    let latitude = parse_latitude(&body[..8])?;
    let symbol_table = body[8] as char;
    let longitude = parse_longitude(&body[9..18])?;
    let symbol_code = body[18] as char;
    let mut report = PositionReport {
        timestamp: None,
        latitude,
        longitude,
        symbol_table,
        symbol_code,
        messaging: false,
        course_deg: None,
        speed_knots: None,
        altitude_ft: None,
        range_miles: None,
        mice: None,
        comment: String::new(),
    };
    let rest = parse_extensions(&body[19..], &mut report);
    report.comment = String::from_utf8_lossy(rest).to_string();
    Ok(report)
}

/// Course/speed `CCC/SSS` right after the symbol, `/A=NNNNNN` anywhere.
fn parse_extensions<'a>(
    rest: &'a [u8],
    report: &mut PositionReport,
) -> &'a [u8] {
    static ALTITUDE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"/A=(-?\d{6})").unwrap());

    let mut rest = rest;
    if rest.len() >= 7
        && rest[3] == b'/'
        && rest[..3].iter().all(u8::is_ascii_digit)
        && rest[4..7].iter().all(u8::is_ascii_digit)
    {
        let course: u16 =
            std::str::from_utf8(&rest[..3]).unwrap().parse().unwrap();
        let speed: f64 =
            std::str::from_utf8(&rest[4..7]).unwrap().parse().unwrap();
        if course <= 360 {
            report.course_deg = Some(course % 360);
            report.speed_knots = Some(speed);
            rest = &rest[7..];
        }
    }
    let text = String::from_utf8_lossy(rest);
    if let Some(found) = ALTITUDE.captures(&text) {
        report.altitude_ft = found[1].parse().ok();
    }
    rest
}

fn decode_compressed(body: &[u8]) -> Result<PositionReport, AprsError> {
    if body.len() < 13 {
        return Err(AprsError::Truncated { expected: 13 });
    }
    let symbol_table = body[0] as char;
    let latitude = 90.0 - base91(&body[1..5])? as f64 / 380_926.0;
    let longitude = -180.0 + base91(&body[5..9])? as f64 / 190_463.0;
    let symbol_code = body[9] as char;

    let mut report = PositionReport {
        timestamp: None,
        latitude,
        longitude,
        symbol_table,
        symbol_code,
        messaging: false,
        course_deg: None,
        speed_knots: None,
        altitude_ft: None,
        range_miles: None,
        mice: None,
        comment: String::from_utf8_lossy(&body[13..]).to_string(),
    };

    // The three extension bytes: course/speed, radio range or altitude,
    // selected by the compression-type byte.
    let (c, s) = (body[10] as i32 - 33, body[11] as i32 - 33);
    let t = body[12] as i32 - 33;
    if body[10] == b' ' || !(0..91).contains(&s) {
        return Ok(report);
    }
    if body[10] == b'{' {
        report.range_miles = Some(2.0 * 1.08_f64.powi(s));
    } else if t & 0x18 == 0x10 && (0..91).contains(&c) {
        // GGA source: the pair is altitude, 1.002^cs feet.
        report.altitude_ft =
            Some(1.002_f64.powi(c * 91 + s).round() as i32);
    } else if (0..90).contains(&c) {
        report.course_deg = Some((c as u16 * 4) % 360);
        report.speed_knots = Some(1.08_f64.powi(s) - 1.0);
    }
    Ok(report)
}

fn base91(bytes: &[u8]) -> Result<u32, AprsError> {
    let mut value = 0u32;
    for &b in bytes {
        let digit = (b as u32)
            .checked_sub(BASE91_OFFSET)
            .filter(|d| *d < 91)
            .ok_or(AprsError::BadPosition("invalid base-91 digit".into()))?;
        value = value * 91 + digit;
    }
    Ok(value)
}

/// An object report (`;`): a named position originated by someone else.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectReport {
    pub name: String,
    /// `*` live, `_` killed.
    pub alive: bool,
    #[serde(flatten)]
    pub position: PositionReport,
}

impl ObjectReport {
    pub(crate) fn decode(body: &[u8]) -> Result<Self, AprsError> {
        if body.len() < 10 {
            return Err(AprsError::Truncated { expected: 10 });
        }
        let name = String::from_utf8_lossy(&body[..9]).trim_end().to_string();
        let alive = match body[9] {
            b'*' => true,
            b'_' => false,
            _ => return Err(AprsError::BadPosition("bad object state".into())),
        };
        let position = PositionReport::decode(&body[10..], false, true)?;
        Ok(ObjectReport { name, alive, position })
    }
}

/// An item report (`)`): like an object, without a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemReport {
    pub name: String,
    pub alive: bool,
    #[serde(flatten)]
    pub position: PositionReport,
}

impl ItemReport {
    pub(crate) fn decode(body: &[u8]) -> Result<Self, AprsError> {
        let split = body
            .iter()
            .take(10)
            .position(|&b| b == b'!' || b == b'_')
            .ok_or(AprsError::BadPosition("unterminated item name".into()))?;
        if split < 3 {
            return Err(AprsError::BadPosition("item name too short".into()));
        }
        let name = String::from_utf8_lossy(&body[..split]).trim().to_string();
        let alive = body[split] == b'!';
        let position =
            PositionReport::decode(&body[split + 1..], false, false)?;
        Ok(ItemReport { name, alive, position })
    }
}

/// A Maidenhead locator at the start of a status text, optionally followed
/// by a symbol pair: `IO91SX/- comment`.
pub(crate) fn leading_grid(bytes: &[u8]) -> Option<(String, usize)> {
    static GRID: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-R]{2}[0-9]{2}([A-Xa-x]{2})?").unwrap()
    });
    let text = std::str::from_utf8(bytes).ok()?;
    let found = GRID.find(text)?;
    let mut consumed = found.end();
    // Validity check: a locator must be delimited, not a word prefix.
    match bytes.get(consumed) {
        None => {}
        Some(b'/') | Some(b'\\') => consumed += 2,
        Some(b' ') => {}
        Some(_) => return None,
    }
    if bytes.get(consumed) == Some(&b' ') {
        consumed += 1;
    }
    Some((found.as_str().to_uppercase(), consumed))
}

/// Center of a 4- or 6-character Maidenhead square.
pub fn grid_to_latlon(grid: &str) -> Option<(f64, f64)> {
    let chars: Vec<char> = grid.to_uppercase().chars().collect();
    if chars.len() != 4 && chars.len() != 6 {
        return None;
    }
    let field = |c: char| -> Option<f64> {
        ('A'..='R').contains(&c).then(|| c as u32 as f64 - 'A' as u32 as f64)
    };
    let digit = |c: char| -> Option<f64> {
        c.is_ascii_digit().then(|| c as u32 as f64 - '0' as u32 as f64)
    };
    let mut longitude = field(chars[0])? * 20.0 - 180.0;
    let mut latitude = field(chars[1])? * 10.0 - 90.0;
    longitude += digit(chars[2])? * 2.0;
    latitude += digit(chars[3])?;
    if chars.len() == 6 {
        let sub = |c: char| -> Option<f64> {
            ('A'..='X').contains(&c).then(|| c as u32 as f64 - 'A' as u32 as f64)
        };
        longitude += sub(chars[4])? * 5.0 / 60.0 + 2.5 / 60.0;
        latitude += sub(chars[5])? * 2.5 / 60.0 + 1.25 / 60.0;
    } else {
        longitude += 1.0;
        latitude += 0.5;
    }
    Some((latitude, longitude))
}

/// Six-character locator for a coordinate pair.
pub fn latlon_to_grid(latitude: f64, longitude: f64) -> String {
    let lon = (longitude + 180.0).clamp(0.0, 359.999);
    let lat = (latitude + 90.0).clamp(0.0, 179.999);
    let mut grid = String::with_capacity(6);
    grid.push((b'A' + (lon / 20.0) as u8) as char);
    grid.push((b'A' + (lat / 10.0) as u8) as char);
    grid.push((b'0' + ((lon % 20.0) / 2.0) as u8) as char);
    grid.push((b'0' + (lat % 10.0) as u8) as char);
    grid.push((b'A' + ((lon % 2.0) * 12.0) as u8) as char);
    grid.push((b'A' + ((lat % 1.0) * 24.0) as u8) as char);
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uncompressed_literal() {
        let report =
            PositionReport::decode(b"4237.14N/07107.45W-Testing", false, false)
                .unwrap();
        assert_relative_eq!(report.latitude, 42.6190, max_relative = 1e-4);
        assert_relative_eq!(report.longitude, -71.1242, max_relative = 1e-4);
        assert_eq!(report.symbol_table, '/');
        assert_eq!(report.symbol_code, '-');
        assert_eq!(report.comment, "Testing");
    }

    #[test]
    fn uncompressed_round_trip() {
        let report =
            PositionReport::decode(b"4237.14N/07107.45W-Testing", false, false)
                .unwrap();
        let encoded = report.encode_uncompressed();
        assert_eq!(encoded, b"!4237.14N/07107.45W-Testing");
        let again =
            PositionReport::decode(&encoded[1..], false, false).unwrap();
        assert_relative_eq!(
            again.latitude,
            report.latitude,
            max_relative = 1e-6
        );
        assert_relative_eq!(
            again.longitude,
            report.longitude,
            max_relative = 1e-6
        );
    }

    #[test]
    fn null_island_rejected() {
        assert_eq!(
            PositionReport::decode(b"0000.00N/00000.00W>", false, false),
            Err(AprsError::NullIsland)
        );
    }

    #[test]
    fn course_speed_extension() {
        let report = PositionReport::decode(
            b"4237.14N/07107.45W>088/036 in motion",
            false,
            false,
        )
        .unwrap();
        assert_eq!(report.course_deg, Some(88));
        assert_eq!(report.speed_knots, Some(36.0));
        assert_eq!(report.comment, " in motion");
    }

    #[test]
    fn embedded_altitude() {
        let report = PositionReport::decode(
            b"4237.14N/07107.45W-PHG5130/A=001234 hilltop",
            false,
            false,
        )
        .unwrap();
        assert_eq!(report.altitude_ft, Some(1234));
        assert!(report.comment.contains("/A=001234"));
    }

    #[test]
    fn position_ambiguity_reads_as_zero() {
        let report =
            PositionReport::decode(b"42  .  N/071  .  W-", false, false)
                .unwrap();
        assert_relative_eq!(report.latitude, 42.0);
        assert_relative_eq!(report.longitude, -71.0);
    }

    #[test]
    fn timestamped_position() {
        let report = PositionReport::decode(
            b"092345z4237.14N/07107.45W-",
            true,
            true,
        )
        .unwrap();
        assert!(report.timestamp.is_some());
        assert!(report.messaging);
    }

    #[test]
    fn compressed_position() {
        // From the APRS 1.01 compressed-format example.
        let report = PositionReport::decode(
            b"/5L!!<*e7>7P[Comment here",
            false,
            false,
        )
        .unwrap();
        assert_relative_eq!(report.latitude, 49.5, max_relative = 1e-3);
        assert_relative_eq!(report.longitude, -72.75, max_relative = 1e-3);
        assert_eq!(report.symbol_code, '>');
        assert_eq!(report.comment, "Comment here");
        // 7P is a course/speed pair: course (0x37-33)*4, speed 1.08^(0x50-33)-1
        assert_eq!(report.course_deg, Some(88));
        assert_relative_eq!(
            report.speed_knots.unwrap(),
            36.2,
            max_relative = 1e-2
        );
    }

    #[test]
    fn compressed_out_of_range_rejected() {
        // A saturated latitude field decodes south of -90.
        assert!(PositionReport::decode(
            b"/{{{{<*e7>  !",
            false,
            false
        )
        .is_err());
    }

    #[test]
    fn object_report() {
        let object = ObjectReport::decode(
            b"LEADER   *092345z4903.50N/07201.75W>088/036",
        )
        .unwrap();
        assert_eq!(object.name, "LEADER");
        assert!(object.alive);
        assert_eq!(object.position.course_deg, Some(88));
    }

    #[test]
    fn item_report() {
        let item =
            ItemReport::decode(b"AID #2!4903.50N/07201.75W!").unwrap();
        assert_eq!(item.name, "AID #2");
        assert!(item.alive);
        assert_relative_eq!(
            item.position.latitude,
            49.0583,
            max_relative = 1e-4
        );
    }

    #[test]
    fn grid_center() {
        let (lat, lon) = grid_to_latlon("FN42").unwrap();
        assert_relative_eq!(lat, 42.5, max_relative = 1e-6);
        assert_relative_eq!(lon, -71.0, max_relative = 1e-6);

        let (lat, lon) = grid_to_latlon("IO91SX").unwrap();
        assert_relative_eq!(lat, 51.979, max_relative = 1e-3);
        assert_relative_eq!(lon, -0.458, max_relative = 1e-2);
    }

    #[test]
    fn grid_round_trip() {
        let grid = latlon_to_grid(42.6190, -71.1242);
        assert_eq!(grid, "FN42KO");
        let (lat, lon) = grid_to_latlon(&grid).unwrap();
        assert!((lat - 42.6190).abs() < 0.05);
        assert!((lon + 71.1242).abs() < 0.05);
    }
}
