/**
 * WIDEn-N digipeating.
 *
 * We service the first un-repeated hop of a received UI frame when it
 * names us or one of our aliases. A WIDEn-N entry is decremented and our
 * callsign inserted ahead of it with the H-bit set, so downstream
 * receivers see who repeated; a spent entry (N reaching 0) is replaced
 * outright. A 30 second window keyed on (source, destination, info)
 * suppresses the loops and echoes every digipeater has to deal with.
 */
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use rs1200::ax25::{Address, Callsign, Control, Frame};
use tracing::{debug, info};

const DEDUP_SECS: i64 = 30;

pub struct Digipeater {
    mycall: Callsign,
    aliases: Vec<String>,
    /// Never decrement WIDEn-N; only service our own callsign.
    direct_only: bool,
    window: VecDeque<(DateTime<Utc>, u64)>,
}

impl Digipeater {
    pub fn new(
        mycall: Callsign,
        aliases: Vec<String>,
        direct_only: bool,
    ) -> Self {
        Digipeater {
            mycall,
            aliases,
            direct_only,
            window: VecDeque::new(),
        }
    }

    /// Decide whether to repeat `frame`; returns the rewritten frame.
    pub fn process(
        &mut self,
        frame: &Frame,
        now: DateTime<Utc>,
    ) -> Option<Frame> {
        if !matches!(frame.control, Control::Ui { .. }) {
            return None;
        }
        // Never repeat our own transmissions, and never put third-party
        // (internet-tunneled) traffic back on the air.
        if frame.source.callsign.matches_base(&self.mycall)
            || frame.info.first() == Some(&b'}')
        {
            return None;
        }
        let next_hop = frame.digipeaters.iter().position(|d| !d.flag)?;
        let entry = &frame.digipeaters[next_hop];
        let base = entry.callsign.base();
        let ssid = entry.callsign.ssid();

        let mut rewritten = frame.clone();
        if entry.callsign.matches_base(&self.mycall) {
            rewritten.digipeaters[next_hop].flag = true;
        } else if !self.direct_only
            && self.aliases.iter().any(|a| a == base)
            && ssid > 0
        {
            let remaining = ssid - 1;
            if remaining == 0 {
                rewritten.digipeaters[next_hop] =
                    Address::repeated(self.mycall.clone());
            } else {
                let decremented = Callsign::new(base, remaining)
                    .expect("alias stays valid");
                rewritten.digipeaters[next_hop] = Address::new(decremented);
                rewritten.digipeaters.insert(
                    next_hop,
                    Address::repeated(self.mycall.clone()),
                );
            }
        } else if self.aliases.iter().any(|a| a == base) && ssid == 0 {
            rewritten.digipeaters[next_hop] =
                Address::repeated(self.mycall.clone());
        } else {
            return None;
        }

        if self.seen_recently(frame, now) {
            debug!("duplicate within {DEDUP_SECS}s suppressed: {frame}");
            return None;
        }
        info!("digipeating {}", rewritten);
        Some(rewritten)
    }

    /// Dedup on (source, destination, information field).
    fn seen_recently(&mut self, frame: &Frame, now: DateTime<Utc>) -> bool {
        let mut hasher = DefaultHasher::new();
        frame.source.callsign.hash(&mut hasher);
        frame.destination.callsign.hash(&mut hasher);
        frame.info.hash(&mut hasher);
        let key = hasher.finish();

        let horizon = now - Duration::seconds(DEDUP_SECS);
        while self.window.front().is_some_and(|(t, _)| *t < horizon) {
            self.window.pop_front();
        }
        if self.window.iter().any(|(_, k)| *k == key) {
            return true;
        }
        self.window.push_back((now, key));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digi() -> Digipeater {
        Digipeater::new(
            "N0CALL".parse().unwrap(),
            vec!["WIDE1".into(), "WIDE2".into(), "RELAY".into()],
            false,
        )
    }

    fn ui(source: &str, path: &[(&str, bool)]) -> Frame {
        Frame::ui(
            source.parse().unwrap(),
            "APRS".parse().unwrap(),
            path.iter()
                .map(|(call, flag)| {
                    let mut a = Address::new(call.parse().unwrap());
                    a.flag = *flag;
                    a
                })
                .collect(),
            b"!4237.14N/07107.45W-".to_vec(),
        )
    }

    fn path_string(frame: &Frame) -> String {
        frame
            .digipeaters
            .iter()
            .map(|d| {
                if d.flag {
                    format!("{}*", d.callsign)
                } else {
                    d.callsign.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn wide2_2_decrement() {
        let mut digi = digi();
        let frame = ui("K1FSY-9", &[("WIDE2-2", false)]);
        let repeated = digi.process(&frame, Utc::now()).unwrap();
        assert_eq!(path_string(&repeated), "N0CALL*,WIDE2-1");
    }

    #[test]
    fn spent_alias_replaced() {
        let mut digi = digi();
        let frame = ui("K1FSY-9", &[("WIDE1-1", false)]);
        let repeated = digi.process(&frame, Utc::now()).unwrap();
        assert_eq!(path_string(&repeated), "N0CALL*");
    }

    #[test]
    fn own_callsign_any_ssid() {
        let mut digi = digi();
        let frame = ui("K1FSY-9", &[("N0CALL-7", false), ("WIDE2-1", false)]);
        let repeated = digi.process(&frame, Utc::now()).unwrap();
        assert_eq!(path_string(&repeated), "N0CALL-7*,WIDE2-1");
    }

    #[test]
    fn dedup_window() {
        let mut digi = digi();
        let now = Utc::now();
        let frame = ui("K1FSY-9", &[("WIDE2-2", false)]);
        assert!(digi.process(&frame, now).is_some());
        // Same packet heard again through another digi: suppressed.
        let frame2 = ui("K1FSY-9", &[("W1XM", true), ("WIDE2-1", false)]);
        assert!(digi.process(&frame2, now + Duration::seconds(2)).is_none());
        // After the window it repeats again.
        assert!(digi
            .process(&frame, now + Duration::seconds(40))
            .is_some());
    }

    #[test]
    fn never_advertise_unrepeated_self() {
        let mut digi = digi();
        let frame = ui(
            "K1FSY-9",
            &[("W1XM", true), ("WIDE2-1", false), ("WIDE1-1", false)],
        );
        if let Some(repeated) = digi.process(&frame, Utc::now()) {
            for entry in &repeated.digipeaters {
                if entry.callsign.matches_base(&"N0CALL".parse().unwrap()) {
                    assert!(entry.flag);
                }
            }
        }
    }

    #[test]
    fn unmatched_hop_ignored() {
        let mut digi = digi();
        // Next un-repeated hop is a foreign callsign.
        let frame = ui("K1FSY-9", &[("W2ABC", false), ("WIDE2-1", false)]);
        assert!(digi.process(&frame, Utc::now()).is_none());
    }

    #[test]
    fn fully_repeated_path_ignored() {
        let mut digi = digi();
        let frame = ui("K1FSY-9", &[("W1XM", true), ("N0CALL", true)]);
        assert!(digi.process(&frame, Utc::now()).is_none());
    }

    #[test]
    fn own_frames_ignored() {
        let mut digi = digi();
        let frame = ui("N0CALL-9", &[("WIDE2-2", false)]);
        assert!(digi.process(&frame, Utc::now()).is_none());
    }

    #[test]
    fn direct_only_mode() {
        let mut digi = Digipeater::new(
            "N0CALL".parse().unwrap(),
            vec!["WIDE1".into(), "WIDE2".into()],
            true,
        );
        let frame = ui("K1FSY-9", &[("WIDE2-2", false)]);
        assert!(digi.process(&frame, Utc::now()).is_none());

        let frame = ui("K1FSY-9", &[("N0CALL", false)]);
        assert!(digi.process(&frame, Utc::now()).is_some());
    }

    #[test]
    fn third_party_never_repeated() {
        let mut digi = digi();
        let mut frame = ui("N0GATE", &[("WIDE2-2", false)]);
        frame.info = b"}K1ABC>APRS,TCPIP*:>tunneled".to_vec();
        assert!(digi.process(&frame, Utc::now()).is_none());
    }

    #[test]
    fn non_ui_frames_ignored() {
        let mut digi = digi();
        let mut frame = ui("K1FSY-9", &[("WIDE2-2", false)]);
        frame.control = Control::Supervisory {
            kind: rs1200::ax25::Supervisory::Rr,
            nr: 0,
            pf: false,
        };
        assert!(digi.process(&frame, Utc::now()).is_none());
    }
}
