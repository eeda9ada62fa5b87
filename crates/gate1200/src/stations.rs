/**
 * The station database.
 *
 * One record per callsign heard, created on first reception and never
 * destroyed while the process runs. The APRS pipeline is the only
 * writer; everything else reads cloned snapshots and listens on the
 * event bus. Histories are bounded: positions by count, receptions by
 * count, weather by age.
 */
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rs1200::aprs::position::PositionReport;
use rs1200::aprs::weather::WeatherReport;
use rs1200::aprs::{AprsData, StatusReport, ThirdParty};
use rs1200::ax25::Frame;
use rs1200::data::tocalls;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::events::GateEvent;

pub const MAX_POSITION_HISTORY: usize = 6_000;
pub const MAX_RECEPTIONS: usize = 200;
/// Distinct paths kept per station.
const MAX_PATHS: usize = 50;

/// How a packet reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxSource {
    /// Over the air, possibly through digipeaters.
    Rf,
    /// Tunneled in a third-party frame; not an RF reception.
    ThirdParty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEntry {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_ft: Option<i32>,
    /// Digipeater hops the source packet took.
    pub hops: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub report: WeatherReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reception {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub hops: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub callsign: String,
    pub first_heard: DateTime<Utc>,
    pub last_heard: DateTime<Utc>,
    pub packets_heard: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_table: Option<char>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_code: Option<char>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_position: Option<PositionEntry>,
    pub position_history: VecDeque<PositionEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_weather: Option<WeatherEntry>,
    pub weather_history: VecDeque<WeatherEntry>,
    pub receptions: VecDeque<Reception>,
    pub paths: BTreeSet<String>,
    /// Fewest digipeater hops this station was ever heard over.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_hops: Option<usize>,
    pub heard_direct: bool,
    pub heard_zero_hop: bool,
    pub is_digipeater: bool,
    /// Set when this record is an object/item, naming its originator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_of: Option<String>,
}

impl Station {
    fn new(callsign: &str, now: DateTime<Utc>) -> Self {
        Station {
            callsign: callsign.to_string(),
            first_heard: now,
            last_heard: now,
            packets_heard: 0,
            messages_received: 0,
            messages_sent: 0,
            symbol_table: None,
            symbol_code: None,
            last_comment: None,
            last_status: None,
            grid: None,
            device: None,
            last_position: None,
            position_history: VecDeque::new(),
            last_weather: None,
            weather_history: VecDeque::new(),
            receptions: VecDeque::new(),
            paths: BTreeSet::new(),
            min_hops: None,
            heard_direct: false,
            heard_zero_hop: false,
            is_digipeater: false,
            object_of: None,
        }
    }

    fn push_position(&mut self, entry: PositionEntry) {
        while self.position_history.len() >= MAX_POSITION_HISTORY {
            self.position_history.pop_front();
        }
        self.position_history.push_back(entry.clone());
        self.last_position = Some(entry);
    }

    fn push_weather(
        &mut self,
        entry: WeatherEntry,
        retention: Duration,
        now: DateTime<Utc>,
    ) {
        let horizon = now - retention;
        while self
            .weather_history
            .front()
            .is_some_and(|e| e.timestamp < horizon)
        {
            self.weather_history.pop_front();
        }
        self.weather_history.push_back(entry.clone());
        self.last_weather = Some(entry);
    }

    /// The flat view used by list endpoints and change events.
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "callsign": self.callsign,
            "first_heard": self.first_heard,
            "last_heard": self.last_heard,
            "packets_heard": self.packets_heard,
            "messages_received": self.messages_received,
            "messages_sent": self.messages_sent,
            "latitude": self.last_position.as_ref().map(|p| p.latitude),
            "longitude": self.last_position.as_ref().map(|p| p.longitude),
            "symbol_table": self.symbol_table,
            "symbol_code": self.symbol_code,
            "symbol_name": match (self.symbol_table, self.symbol_code) {
                (Some(table), Some(code)) => {
                    rs1200::aprs::symbol_name(table, code)
                }
                _ => None,
            },
            "comment": self.last_comment,
            "status": self.last_status,
            "grid": self.grid,
            "device": self.device,
            "min_hops": self.min_hops,
            "heard_direct": self.heard_direct,
            "heard_zero_hop": self.heard_zero_hop,
            "is_digipeater": self.is_digipeater,
            "has_weather": self.last_weather.is_some(),
            "object_of": self.object_of,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Last,
    Name,
    Packets,
    Hops,
}

impl SortKey {
    pub fn parse(s: &str) -> Self {
        match s {
            "name" => SortKey::Name,
            "packets" => SortKey::Packets,
            "hops" => SortKey::Hops,
            _ => SortKey::Last,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StationDb {
    stations: BTreeMap<String, Station>,
    #[serde(skip, default = "default_retention")]
    weather_retention: Duration,
}

fn default_retention() -> Duration {
    Duration::hours(48)
}

impl StationDb {
    pub fn new() -> Self {
        StationDb {
            stations: BTreeMap::new(),
            weather_retention: default_retention(),
        }
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn get(&self, callsign: &str) -> Option<Station> {
        self.stations.get(callsign).cloned()
    }

    pub fn list(&self, sort: SortKey) -> Vec<serde_json::Value> {
        let mut stations: Vec<&Station> = self.stations.values().collect();
        match sort {
            SortKey::Last => {
                stations.sort_by(|a, b| b.last_heard.cmp(&a.last_heard))
            }
            SortKey::Name => {
                stations.sort_by(|a, b| a.callsign.cmp(&b.callsign))
            }
            SortKey::Packets => {
                stations.sort_by(|a, b| b.packets_heard.cmp(&a.packets_heard))
            }
            SortKey::Hops => stations.sort_by(|a, b| {
                a.min_hops
                    .unwrap_or(usize::MAX)
                    .cmp(&b.min_hops.unwrap_or(usize::MAX))
            }),
        }
        stations.iter().map(|s| s.summary()).collect()
    }

    pub fn weather_stations(&self) -> Vec<serde_json::Value> {
        self.stations
            .values()
            .filter(|s| s.last_weather.is_some())
            .map(|s| {
                let mut summary = s.summary();
                summary["weather"] =
                    serde_json::to_value(&s.last_weather).unwrap_or_default();
                summary
            })
            .collect()
    }

    pub fn digipeaters(&self) -> Vec<serde_json::Value> {
        self.stations
            .values()
            .filter(|s| s.is_digipeater)
            .map(|s| s.summary())
            .collect()
    }

    /// Atomically update the database from one received frame and its
    /// decoded payload. Returns the change events to publish.
    pub fn ingest(
        &mut self,
        frame: &Frame,
        data: &AprsData,
        source: RxSource,
        now: DateTime<Utc>,
    ) -> Vec<GateEvent> {
        let callsign = frame.source.callsign.to_string();
        let hops =
            frame.digipeaters.iter().filter(|d| d.flag).count();
        let path = frame
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
            .join(",");

        // Mark every digipeater that actually handled the frame.
        for digi in frame.digipeaters.iter().filter(|d| d.flag) {
            let name = digi.callsign.to_string();
            self.stations
                .entry(name.clone())
                .or_insert_with(|| Station::new(&name, now))
                .is_digipeater = true;
        }

        let retention = self.weather_retention;
        let station = self
            .stations
            .entry(callsign.clone())
            .or_insert_with(|| Station::new(&callsign, now));
        station.last_heard = now;
        station.packets_heard += 1;
        while station.receptions.len() >= MAX_RECEPTIONS {
            station.receptions.pop_front();
        }
        station.receptions.push_back(Reception {
            timestamp: now,
            path: path.clone(),
            hops,
        });
        if station.paths.len() < MAX_PATHS {
            station.paths.insert(path);
        }
        station.min_hops =
            Some(station.min_hops.map_or(hops, |m| m.min(hops)));
        if source == RxSource::Rf {
            station.heard_direct = true;
            if hops == 0 {
                station.heard_zero_hop = true;
            }
        }

        // Non-Mic-E senders identify their software in the tocall.
        if !matches!(
            data,
            AprsData::Position(PositionReport { mice: Some(_), .. })
        ) {
            if let Some(device) =
                tocalls::device_for_tocall(frame.destination.callsign.base())
            {
                station.device =
                    Some(format!("{} {}", device.vendor, device.model));
            }
        }

        let mut events = Vec::new();
        self.apply(&callsign, data, retention, now, &mut events);
        events
    }

    /// Apply a decoded payload to `callsign`'s record.
    fn apply(
        &mut self,
        callsign: &str,
        data: &AprsData,
        retention: Duration,
        now: DateTime<Utc>,
        events: &mut Vec<GateEvent>,
    ) {
        match data {
            AprsData::Position(report) => {
                let station = self.expect(callsign, now);
                station.symbol_table = Some(report.symbol_table);
                station.symbol_code = Some(report.symbol_code);
                if !report.comment.is_empty() {
                    station.last_comment = Some(report.comment.clone());
                }
                if let Some(extras) = &report.mice {
                    if let Some(device) = &extras.device {
                        station.device = Some(device.clone());
                    }
                }
                let hops = station
                    .receptions
                    .back()
                    .map(|r| r.hops)
                    .unwrap_or_default();
                station.push_position(PositionEntry {
                    timestamp: now,
                    latitude: report.latitude,
                    longitude: report.longitude,
                    altitude_ft: report.altitude_ft,
                    hops,
                });
                events.push(GateEvent::StationUpdate(station.summary()));
            }
            AprsData::Weather(report) => {
                let station = self.expect(callsign, now);
                station.push_weather(
                    WeatherEntry { timestamp: now, report: report.clone() },
                    retention,
                    now,
                );
                events.push(GateEvent::WeatherUpdate(station.summary()));
            }
            AprsData::Status(StatusReport { grid, text, .. }) => {
                let station = self.expect(callsign, now);
                station.last_status = Some(text.clone());
                if grid.is_some() {
                    station.grid = grid.clone();
                }
                events.push(GateEvent::StationUpdate(station.summary()));
            }
            AprsData::Message(message) => {
                self.expect(callsign, now).messages_sent += 1;
                if let Some(addressee) =
                    self.stations.get_mut(&message.addressee)
                {
                    addressee.messages_received += 1;
                }
                let station = self.expect(callsign, now);
                events.push(GateEvent::StationUpdate(station.summary()));
            }
            AprsData::Object(object) => {
                self.upsert_named(
                    &object.name,
                    callsign,
                    &object.position,
                    now,
                    events,
                );
            }
            AprsData::Item(item) => {
                self.upsert_named(
                    &item.name,
                    callsign,
                    &item.position,
                    now,
                    events,
                );
            }
            AprsData::ThirdParty(ThirdParty {
                source: inner_source,
                data,
                ..
            }) => {
                // The tunneled originator is a station of its own, but
                // never an RF reception.
                let inner = inner_source.to_string();
                let station = self.expect(&inner, now);
                station.last_heard = now;
                station.packets_heard += 1;
                self.apply(&inner, data, retention, now, events);
            }
            AprsData::Telemetry(_) | AprsData::Unknown { .. } => {
                let station = self.expect(callsign, now);
                events.push(GateEvent::StationUpdate(station.summary()));
            }
        }
    }

    fn upsert_named(
        &mut self,
        name: &str,
        originator: &str,
        report: &PositionReport,
        now: DateTime<Utc>,
        events: &mut Vec<GateEvent>,
    ) {
        let record = self
            .stations
            .entry(name.to_string())
            .or_insert_with(|| Station::new(name, now));
        record.object_of = Some(originator.to_string());
        record.last_heard = now;
        record.symbol_table = Some(report.symbol_table);
        record.symbol_code = Some(report.symbol_code);
        if !report.comment.is_empty() {
            record.last_comment = Some(report.comment.clone());
        }
        record.push_position(PositionEntry {
            timestamp: now,
            latitude: report.latitude,
            longitude: report.longitude,
            altitude_ft: report.altitude_ft,
            hops: 0,
        });
        events.push(GateEvent::StationUpdate(record.summary()));
    }

    fn expect(&mut self, callsign: &str, now: DateTime<Utc>) -> &mut Station {
        self.stations
            .entry(callsign.to_string())
            .or_insert_with(|| Station::new(callsign, now))
    }

    /// Gzipped JSON, write-then-rename.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let tmp = path.with_extension("tmp");
        let file = std::fs::File::create(&tmp)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&serde_json::to_vec(&self.stations)?)?;
        encoder.finish()?;
        std::fs::rename(&tmp, path)?;
        info!("saved {} stations to {}", self.stations.len(), path.display());
        Ok(())
    }

    /// Best effort: a corrupt or missing file starts fresh.
    pub fn load(path: &Path) -> Self {
        let mut db = StationDb::new();
        let Ok(file) = std::fs::File::open(path) else {
            return db;
        };
        let mut decoder = GzDecoder::new(file);
        let mut bytes = Vec::new();
        if let Err(e) = decoder.read_to_end(&mut bytes) {
            warn!("{}: {e}, starting fresh", path.display());
            return db;
        }
        match serde_json::from_slice(&bytes) {
            Ok(stations) => db.stations = stations,
            Err(e) => warn!("{}: {e}, starting fresh", path.display()),
        }
        info!("loaded {} stations", db.stations.len());
        db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rs1200::ax25::Address;

    fn ui(source: &str, dest: &str, path: &[(&str, bool)], info: &[u8]) -> Frame {
        Frame::ui(
            source.parse().unwrap(),
            dest.parse().unwrap(),
            path.iter()
                .map(|(call, heard)| {
                    let mut a = Address::new(call.parse().unwrap());
                    a.flag = *heard;
                    a
                })
                .collect(),
            info.to_vec(),
        )
    }

    fn ingest(db: &mut StationDb, frame: &Frame) -> Vec<GateEvent> {
        let data = AprsData::decode(frame).unwrap();
        db.ingest(frame, &data, RxSource::Rf, Utc::now())
    }

    #[test]
    fn position_creates_station() {
        let mut db = StationDb::new();
        let frame = ui(
            "K1FSY-9",
            "APDW16",
            &[],
            b"!4237.14N/07107.45W-Testing",
        );
        let events = ingest(&mut db, &frame);
        assert_eq!(events.len(), 1);

        let station = db.get("K1FSY-9").unwrap();
        assert_eq!(station.packets_heard, 1);
        assert!(station.heard_direct);
        assert!(station.heard_zero_hop);
        assert_eq!(station.position_history.len(), 1);
        assert_eq!(station.device.as_deref(), Some("WB2OSZ Dire Wolf"));
        assert_eq!(station.min_hops, Some(0));
    }

    #[test]
    fn hop_accounting() {
        let mut db = StationDb::new();
        let frame = ui(
            "K1FSY-9",
            "APRS",
            &[("W1XM", true), ("WIDE2-1", false)],
            b"!4237.14N/07107.45W-",
        );
        ingest(&mut db, &frame);

        let station = db.get("K1FSY-9").unwrap();
        assert!(station.heard_direct);
        assert!(!station.heard_zero_hop);
        assert_eq!(station.min_hops, Some(1));
        assert!(station.paths.contains("W1XM*,WIDE2-1"));

        // The digipeater that repeated it gets flagged.
        assert!(db.get("W1XM").unwrap().is_digipeater);
        assert!(db.get("WIDE2-1").is_none() || !db.get("WIDE2-1").unwrap().is_digipeater);
    }

    #[test]
    fn third_party_not_direct() {
        let mut db = StationDb::new();
        let frame = ui(
            "N0GATE",
            "APRS",
            &[],
            b"}K1ABC-9>APRS,TCPIP*:!4237.14N/07107.45W-via igate",
        );
        ingest(&mut db, &frame);

        // The iGate itself was heard direct.
        assert!(db.get("N0GATE").unwrap().heard_direct);
        // The tunneled station was not.
        let inner = db.get("K1ABC-9").unwrap();
        assert!(!inner.heard_direct);
        assert!(!inner.heard_zero_hop);
        assert_eq!(inner.position_history.len(), 1);
    }

    #[test]
    fn replay_is_idempotent_except_counters() {
        let mut db = StationDb::new();
        let frame =
            ui("K1FSY-9", "APRS", &[], b"!4237.14N/07107.45W-Testing");
        let now = Utc::now();
        let data = AprsData::decode(&frame).unwrap();
        db.ingest(&frame, &data, RxSource::Rf, now);
        let first = db.get("K1FSY-9").unwrap();
        db.ingest(&frame, &data, RxSource::Rf, now);
        let second = db.get("K1FSY-9").unwrap();

        assert_eq!(second.packets_heard, first.packets_heard + 1);
        assert_eq!(second.last_heard, first.last_heard);
        assert_eq!(
            second.last_position.as_ref().map(|p| p.latitude),
            first.last_position.as_ref().map(|p| p.latitude)
        );
        assert_eq!(second.paths, first.paths);
    }

    #[test]
    fn position_history_bounded() {
        let mut db = StationDb::new();
        let now = Utc::now();
        let frame =
            ui("K1FSY-9", "APRS", &[], b"!4237.14N/07107.45W-");
        let data = AprsData::decode(&frame).unwrap();
        for _ in 0..(MAX_POSITION_HISTORY + 10) {
            db.ingest(&frame, &data, RxSource::Rf, now);
        }
        assert_eq!(
            db.get("K1FSY-9").unwrap().position_history.len(),
            MAX_POSITION_HISTORY
        );
    }

    #[test]
    fn weather_updates() {
        let mut db = StationDb::new();
        let frame = ui(
            "WX1BOS",
            "APRS",
            &[],
            b"_10090556c220s004g005t077r000p000P000h50b09900",
        );
        let events = ingest(&mut db, &frame);
        assert!(matches!(events[0], GateEvent::WeatherUpdate(_)));
        let station = db.get("WX1BOS").unwrap();
        assert!(station.last_weather.is_some());
        assert_eq!(db.weather_stations().len(), 1);
    }

    #[test]
    fn object_keyed_by_name() {
        let mut db = StationDb::new();
        let frame = ui(
            "K1FSY-9",
            "APRS",
            &[],
            b";LEADER   *092345z4903.50N/07201.75W>",
        );
        ingest(&mut db, &frame);
        let object = db.get("LEADER").unwrap();
        assert_eq!(object.object_of.as_deref(), Some("K1FSY-9"));
        assert!(object.last_position.is_some());
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut db = StationDb::new();
        let frame =
            ui("K1FSY-9", "APRS", &[], b"!4237.14N/07107.45W-Testing");
        ingest(&mut db, &frame);

        let dir = std::env::temp_dir();
        let path = dir.join("gate1200_test_stations.json.gz");
        db.save(&path).unwrap();
        let loaded = StationDb::load(&path);
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.len(), db.len());
        assert_eq!(
            loaded.get("K1FSY-9").unwrap().last_comment.as_deref(),
            Some("Testing")
        );
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = std::env::temp_dir();
        let path = dir.join("gate1200_test_corrupt.json.gz");
        std::fs::write(&path, b"not gzip at all").unwrap();
        let loaded = StationDb::load(&path);
        let _ = std::fs::remove_file(&path);
        assert!(loaded.is_empty());
    }
}
