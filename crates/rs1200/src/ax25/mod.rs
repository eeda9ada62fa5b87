pub mod link;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// PID value for "no layer 3", the value APRS uses.
pub const PID_NO_LAYER3: u8 = 0xF0;

/// Up to 8 digipeater entries fit in an AX.25 address field.
pub const MAX_DIGIPEATERS: usize = 8;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DecodeError {
    #[error("frame truncated at offset {offset}")]
    ShortFrame { offset: usize },
    #[error("invalid callsign at offset {offset}")]
    BadCallsign { offset: usize },
    #[error("invalid callsign text {0:?}")]
    BadCallsignText(String),
    #[error("unknown control byte {control:#04x}")]
    BadControl { control: u8 },
    #[error("more than {MAX_DIGIPEATERS} digipeaters")]
    TooManyDigipeaters,
}

/// A base callsign of 1..=6 uppercase alphanumerics plus an SSID 0..=15.
///
/// The lexical form is `BASE` or `BASE-SSID` with SSID 0 omitted. The
/// wire form is 7 bytes, each callsign byte left-shifted by one and
/// space-padded, then an SSID byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Callsign {
    base: String,
    ssid: u8,
}

impl Callsign {
    pub fn new(base: &str, ssid: u8) -> Result<Self, DecodeError> {
        let base = base.trim_end().to_uppercase();
        if base.is_empty()
            || base.len() > 6
            || ssid > 15
            || !base.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(DecodeError::BadCallsignText(format!("{base}-{ssid}")));
        }
        Ok(Callsign { base, ssid })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// SSID-agnostic comparison, used for "addressed to us" checks.
    pub fn matches_base(&self, other: &Callsign) -> bool {
        self.base == other.base
    }

    fn decode_wire(bytes: &[u8], offset: usize) -> Result<Self, DecodeError> {
        let mut base = String::with_capacity(6);
        for &byte in &bytes[..6] {
            let c = byte >> 1;
            if c == b' ' {
                break;
            }
            if !c.is_ascii_alphanumeric() {
                return Err(DecodeError::BadCallsign { offset });
            }
            base.push(c as char);
        }
        if base.is_empty() {
            return Err(DecodeError::BadCallsign { offset });
        }
        Ok(Callsign {
            base,
            ssid: (bytes[6] >> 1) & 0x0F,
        })
    }
}

impl FromStr for Callsign {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((base, ssid)) => {
                let ssid = ssid
                    .parse()
                    .map_err(|_| DecodeError::BadCallsignText(s.into()))?;
                Callsign::new(base, ssid)
            }
            None => Callsign::new(s, 0),
        }
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}-{}", self.base, self.ssid)
        }
    }
}

impl Serialize for Callsign {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Callsign {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One 7-byte entry of the address field.
///
/// The SSID byte carries more than the SSID: bit 7 is the command/response
/// bit on destination and source, and the has-been-repeated (H) bit on a
/// digipeater entry; bits 5..=6 are reserved (normally both set); bit 0
/// marks the end of the address field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub callsign: Callsign,
    /// C bit (destination/source) or H bit (digipeater entry).
    pub flag: bool,
    /// The two reserved bits, preserved for byte-exact re-encoding.
    pub reserved: u8,
}

impl Address {
    pub fn new(callsign: Callsign) -> Self {
        Address {
            callsign,
            flag: false,
            reserved: 0b11,
        }
    }

    pub fn repeated(callsign: Callsign) -> Self {
        Address {
            callsign,
            flag: true,
            reserved: 0b11,
        }
    }

    fn decode_wire(
        bytes: &[u8],
        offset: usize,
    ) -> Result<(Self, bool), DecodeError> {
        let callsign = Callsign::decode_wire(bytes, offset)?;
        let ssid_byte = bytes[6];
        Ok((
            Address {
                callsign,
                flag: ssid_byte & 0x80 != 0,
                reserved: (ssid_byte >> 5) & 0b11,
            },
            ssid_byte & 0x01 != 0,
        ))
    }

    fn encode_wire(&self, out: &mut Vec<u8>, last: bool) {
        let base = self.callsign.base.as_bytes();
        for i in 0..6 {
            out.push(base.get(i).copied().unwrap_or(b' ') << 1);
        }
        let mut ssid_byte = (self.callsign.ssid << 1) | (self.reserved << 5);
        if self.flag {
            ssid_byte |= 0x80;
        }
        if last {
            ssid_byte |= 0x01;
        }
        out.push(ssid_byte);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.callsign)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Supervisory {
    /// RR: ready to receive, acknowledges up to N(R)-1
    Rr,
    /// RNR: temporarily busy
    Rnr,
    /// REJ: request retransmission from N(R)
    Rej,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Unnumbered {
    Sabm,
    Disc,
    Dm,
    Ua,
    Frmr,
}

/// The AX.25 control byte, decoded.
///
/// UI is formally an unnumbered subtype but is the entire APRS traffic
/// class, so it gets its own variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "frame")]
pub enum Control {
    #[serde(rename = "UI")]
    Ui { pf: bool },
    #[serde(rename = "I")]
    Information { ns: u8, nr: u8, pf: bool },
    #[serde(rename = "S")]
    Supervisory { kind: Supervisory, nr: u8, pf: bool },
    #[serde(rename = "U")]
    Unnumbered { kind: Unnumbered, pf: bool },
}

impl Control {
    pub fn decode(byte: u8) -> Result<Self, DecodeError> {
        let pf = byte & 0x10 != 0;
        if byte & 0x01 == 0 {
            return Ok(Control::Information {
                ns: (byte >> 1) & 0x07,
                nr: (byte >> 5) & 0x07,
                pf,
            });
        }
        if byte & 0x03 == 0x01 {
            let kind = match (byte >> 2) & 0x03 {
                0 => Supervisory::Rr,
                1 => Supervisory::Rnr,
                2 => Supervisory::Rej,
                _ => return Err(DecodeError::BadControl { control: byte }),
            };
            return Ok(Control::Supervisory {
                kind,
                nr: (byte >> 5) & 0x07,
                pf,
            });
        }
        match byte & !0x10 {
            0x03 => Ok(Control::Ui { pf }),
            0x2F => Ok(Control::Unnumbered { kind: Unnumbered::Sabm, pf }),
            0x43 => Ok(Control::Unnumbered { kind: Unnumbered::Disc, pf }),
            0x0F => Ok(Control::Unnumbered { kind: Unnumbered::Dm, pf }),
            0x63 => Ok(Control::Unnumbered { kind: Unnumbered::Ua, pf }),
            0x87 => Ok(Control::Unnumbered { kind: Unnumbered::Frmr, pf }),
            _ => Err(DecodeError::BadControl { control: byte }),
        }
    }

    pub fn encode(&self) -> u8 {
        let (byte, pf) = match *self {
            Control::Ui { pf } => (0x03, pf),
            Control::Information { ns, nr, pf } => {
                ((nr << 5) | (ns << 1), pf)
            }
            Control::Supervisory { kind, nr, pf } => {
                let s = match kind {
                    Supervisory::Rr => 0x01,
                    Supervisory::Rnr => 0x05,
                    Supervisory::Rej => 0x09,
                };
                ((nr << 5) | s, pf)
            }
            Control::Unnumbered { kind, pf } => {
                let u = match kind {
                    Unnumbered::Sabm => 0x2F,
                    Unnumbered::Disc => 0x43,
                    Unnumbered::Dm => 0x0F,
                    Unnumbered::Ua => 0x63,
                    Unnumbered::Frmr => 0x87,
                };
                (u, pf)
            }
        };
        if pf {
            byte | 0x10
        } else {
            byte
        }
    }

    /// UI and I frames carry a PID byte; S and plain U frames do not
    /// (FRMR carries its diagnostic bytes in the information field).
    pub fn has_pid(&self) -> bool {
        matches!(self, Control::Ui { .. } | Control::Information { .. })
    }
}

/// A decoded AX.25 frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub destination: Address,
    pub source: Address,
    pub digipeaters: Vec<Address>,
    pub control: Control,
    pub pid: Option<u8>,
    pub info: Vec<u8>,
}

impl Frame {
    /// A UI frame with PID 0xF0, the shape of every APRS transmission.
    pub fn ui(
        source: Callsign,
        destination: Callsign,
        path: Vec<Address>,
        info: Vec<u8>,
    ) -> Self {
        let mut destination = Address::new(destination);
        // Command frame per AX.25 2.2 convention: C bit set on the
        // destination, clear on the source.
        destination.flag = true;
        Frame {
            destination,
            source: Address::new(source),
            digipeaters: path,
            control: Control::Ui { pf: false },
            pid: Some(PID_NO_LAYER3),
            info,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut offset = 0;
        let mut addresses = Vec::new();
        loop {
            let group = bytes
                .get(offset..offset + 7)
                .ok_or(DecodeError::ShortFrame { offset })?;
            let (address, last) = Address::decode_wire(group, offset)?;
            addresses.push(address);
            offset += 7;
            if last {
                break;
            }
            if addresses.len() > 2 + MAX_DIGIPEATERS {
                return Err(DecodeError::TooManyDigipeaters);
            }
        }
        if addresses.len() < 2 {
            return Err(DecodeError::ShortFrame { offset });
        }
        let digipeaters = addresses.split_off(2);
        let source = addresses.pop().expect("two addresses checked");
        let destination = addresses.pop().expect("two addresses checked");

        let control_byte = *bytes
            .get(offset)
            .ok_or(DecodeError::ShortFrame { offset })?;
        let control = Control::decode(control_byte)?;
        offset += 1;

        let pid = if control.has_pid() {
            let pid = *bytes
                .get(offset)
                .ok_or(DecodeError::ShortFrame { offset })?;
            offset += 1;
            Some(pid)
        } else {
            None
        };

        Ok(Frame {
            destination,
            source,
            digipeaters,
            control,
            pid,
            info: bytes[offset..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(16 + 7 * self.digipeaters.len() + self.info.len());
        self.destination.encode_wire(&mut out, false);
        self.source
            .encode_wire(&mut out, self.digipeaters.is_empty());
        if let Some((last, init)) = self.digipeaters.split_last() {
            for digi in init {
                digi.encode_wire(&mut out, false);
            }
            last.encode_wire(&mut out, true);
        }
        out.push(self.control.encode());
        if let Some(pid) = self.pid {
            out.push(pid);
        }
        out.extend_from_slice(&self.info);
        out
    }

    /// True for the frames the APRS pipeline consumes.
    pub fn is_aprs(&self) -> bool {
        matches!(self.control, Control::Ui { .. })
            && self.pid == Some(PID_NO_LAYER3)
    }
}

/// TNC2 monitor format: `SRC>DEST,DIGI*,DIGI:info`.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.source, self.destination)?;
        for digi in &self.digipeaters {
            write!(f, ",{}{}", digi, if digi.flag { "*" } else { "" })?;
        }
        write!(f, ":{}", String::from_utf8_lossy(&self.info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexlit::hex;

    #[test]
    fn wire_fixture() {
        // N0CALL-5>APRS:>hi as captured off the air.
        let bytes = hex!("82a0a4a64040e09c60868298986b03f03e6869");
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.source.callsign.to_string(), "N0CALL-5");
        assert_eq!(frame.destination.callsign.to_string(), "APRS");
        assert!(frame.destination.flag);
        assert_eq!(frame.control, Control::Ui { pf: false });
        assert_eq!(frame.pid, Some(PID_NO_LAYER3));
        assert_eq!(frame.info, b">hi");
        assert_eq!(frame.encode(), bytes);
    }

    #[test]
    fn callsign_text_forms() {
        let plain: Callsign = "N0CALL".parse().unwrap();
        assert_eq!(plain.to_string(), "N0CALL");
        assert_eq!(plain.ssid(), 0);

        let with_ssid: Callsign = "K1FSY-9".parse().unwrap();
        assert_eq!(with_ssid.base(), "K1FSY");
        assert_eq!(with_ssid.ssid(), 9);

        assert!("TOOLONGCALL".parse::<Callsign>().is_err());
        assert!("N0CALL-16".parse::<Callsign>().is_err());
        assert!("".parse::<Callsign>().is_err());
    }

    #[test]
    fn address_shift() {
        let callsign: Callsign = "N0CALL-5".parse().unwrap();
        let mut wire = Vec::new();
        Address::new(callsign).encode_wire(&mut wire, false);
        assert_eq!(
            wire,
            vec![
                b'N' << 1,
                b'0' << 1,
                b'C' << 1,
                b'A' << 1,
                b'L' << 1,
                b'L' << 1,
                0x60 | (5 << 1),
            ]
        );
    }

    #[test]
    fn short_callsign_space_padded() {
        let callsign: Callsign = "W1AW".parse().unwrap();
        let mut wire = Vec::new();
        Address::new(callsign).encode_wire(&mut wire, true);
        assert_eq!(wire[4], b' ' << 1);
        assert_eq!(wire[5], b' ' << 1);
        assert_eq!(wire[6] & 0x01, 0x01);

        let (address, last) = Address::decode_wire(&wire, 0).unwrap();
        assert_eq!(address.callsign.to_string(), "W1AW");
        assert!(last);
    }

    #[test]
    fn control_bytes() {
        assert_eq!(Control::decode(0x03).unwrap(), Control::Ui { pf: false });
        assert_eq!(
            Control::decode(0x3F).unwrap(),
            Control::Unnumbered { kind: Unnumbered::Sabm, pf: true }
        );
        // I frame with N(S)=2, N(R)=5, P set
        assert_eq!(
            Control::decode(0xB4).unwrap(),
            Control::Information { ns: 2, nr: 5, pf: true }
        );
        // RR with N(R)=3
        assert_eq!(
            Control::decode(0x61).unwrap(),
            Control::Supervisory { kind: Supervisory::Rr, nr: 3, pf: false }
        );
        for byte in [0x03u8, 0x3F, 0xB4, 0x61, 0x87, 0x43, 0x0F, 0x63] {
            assert_eq!(Control::decode(byte).unwrap().encode(), byte);
        }
    }

    #[test]
    fn ui_round_trip_byte_exact() {
        let frame = Frame::ui(
            "K1FSY-9".parse().unwrap(),
            "APRS".parse().unwrap(),
            vec![
                Address::repeated("W1XM".parse().unwrap()),
                Address::new("WIDE2-1".parse().unwrap()),
            ],
            b"!4237.14N/07107.45W-Testing".to_vec(),
        );
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.encode(), bytes);
        assert!(decoded.is_aprs());
        assert!(decoded.digipeaters[0].flag);
        assert!(!decoded.digipeaters[1].flag);
    }

    #[test]
    fn reserved_and_cr_bits_preserved() {
        let mut frame = Frame::ui(
            "N0CALL".parse().unwrap(),
            "APRS".parse().unwrap(),
            vec![],
            b">status".to_vec(),
        );
        // Response frame with non-standard reserved bits.
        frame.destination.flag = false;
        frame.source.flag = true;
        frame.source.reserved = 0b01;
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.encode(), bytes);
        assert_eq!(decoded.source.reserved, 0b01);
        assert!(decoded.source.flag);
    }

    #[test]
    fn sabm_has_no_pid() {
        let mut frame = Frame::ui(
            "N0CALL".parse().unwrap(),
            "W1AW-3".parse().unwrap(),
            vec![],
            vec![],
        );
        frame.control = Control::Unnumbered { kind: Unnumbered::Sabm, pf: true };
        frame.pid = None;
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 15);
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.pid, None);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn truncated_frames_rejected() {
        let frame = Frame::ui(
            "N0CALL".parse().unwrap(),
            "APRS".parse().unwrap(),
            vec![],
            b"x".to_vec(),
        );
        let bytes = frame.encode();
        for cut in [3, 7, 13, 14] {
            assert!(matches!(
                Frame::decode(&bytes[..cut]),
                Err(DecodeError::ShortFrame { .. })
            ));
        }
    }

    #[test]
    fn monitor_format() {
        let frame = Frame::ui(
            "K1FSY-9".parse().unwrap(),
            "APRS".parse().unwrap(),
            vec![Address::repeated("W1XM".parse().unwrap())],
            b">hello".to_vec(),
        );
        assert_eq!(frame.to_string(), "K1FSY-9>APRS,W1XM*:>hello");
    }
}
