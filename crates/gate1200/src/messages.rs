/**
 * The message manager.
 *
 * Outgoing messages ride a two-tier retry schedule: the fast interval
 * until the packet is heard digipeated (evidence it entered the
 * network), then the slow interval until the addressee acks, the retry
 * budget runs out, or the slow deadline passes. Incoming messages
 * addressed to us are stored unread and acknowledged automatically
 * unless AUTO_ACK is off.
 *
 * iGates replay messages with mangled whitespace and truncated bodies,
 * so duplicate suppression is two-stage: an exact (from, to, body, id)
 * match over five minutes, then a fuzzy token-similarity match over the
 * same window.
 */
use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rs1200::aprs::message::{AprsMessage, MessageKind};
use rs1200::aprs::AprsData;
use rs1200::ax25::{Address, Callsign, Frame};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::events::GateEvent;
use crate::txqueue::{Outbound, TxPriority};

/// Destination tocall for frames we originate.
pub const TOCALL: &str = "APZ120";

/// Exact and fuzzy dedup window, seconds.
const DEDUP_WINDOW_SECS: i64 = 300;

/// Token similarity above which two bodies are the same message.
const FUZZY_THRESHOLD: f64 = 0.8;

/// Heard-message ring for the monitor endpoint.
const MAX_MONITORED: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Digipeated,
    Acknowledged,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub from: String,
    pub to: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub state: DeliveryState,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_transmit: Option<DateTime<Utc>>,
    pub unread: bool,
}

/// Retry bookkeeping for one in-flight outgoing message.
#[derive(Debug)]
struct InFlight {
    record: usize,
    path: Vec<Address>,
    last_transmit: DateTime<Utc>,
}

struct DedupEntry {
    timestamp: DateTime<Utc>,
    from: String,
    to: String,
    body: String,
    id: Option<String>,
}

pub struct MessageManager {
    mycall: Callsign,
    auto_ack: bool,
    retry_budget: u32,
    fast: Duration,
    slow: Duration,
    next_id: u32,
    store: Vec<MessageRecord>,
    in_flight: Vec<InFlight>,
    dedup: VecDeque<DedupEntry>,
    monitored: VecDeque<MessageRecord>,
}

impl MessageManager {
    pub fn new(
        mycall: Callsign,
        auto_ack: bool,
        retry_budget: u32,
        fast_secs: u64,
        slow_secs: u64,
    ) -> Self {
        MessageManager {
            mycall,
            auto_ack,
            retry_budget,
            fast: Duration::seconds(fast_secs as i64),
            slow: Duration::seconds(slow_secs as i64),
            next_id: 1,
            store: Vec::new(),
            in_flight: Vec::new(),
            dedup: VecDeque::new(),
            monitored: VecDeque::new(),
        }
    }

    /// Queue a message for transmission; returns the generated
    /// message-id and the first transmission.
    pub fn send(
        &mut self,
        to: &Callsign,
        body: &str,
        path: Vec<Address>,
        now: DateTime<Utc>,
    ) -> (String, Outbound) {
        let message_id = format!("{}", self.next_id);
        self.next_id = if self.next_id >= 99_999 { 1 } else { self.next_id + 1 };

        let record = MessageRecord {
            from: self.mycall.to_string(),
            to: to.to_string(),
            body: body.chars().take(rs1200::aprs::message::MAX_BODY).collect(),
            message_id: Some(message_id.clone()),
            direction: Direction::Sent,
            timestamp: now,
            state: DeliveryState::Pending,
            retries: 0,
            first_transmit: Some(now),
            unread: false,
        };
        self.store.push(record);
        self.in_flight.push(InFlight {
            record: self.store.len() - 1,
            path: path.clone(),
            last_transmit: now,
        });

        let frame = self.message_frame(self.store.len() - 1, path);
        info!("message {} to {} queued", message_id, to);
        (message_id, Outbound::new(frame, TxPriority::User))
    }

    fn message_frame(&self, record: usize, path: Vec<Address>) -> Frame {
        Frame::ui(
            self.mycall.clone(),
            TOCALL.parse().expect("tocall is valid"),
            path,
            encode_record_info(&self.store[record]),
        )
    }

    /// A frame was heard on the channel (or echoed from our own
    /// transmitter). Returns frames to transmit and events to publish.
    pub fn on_frame(
        &mut self,
        frame: &Frame,
        data: &AprsData,
        now: DateTime<Utc>,
    ) -> (Vec<Outbound>, Vec<GateEvent>) {
        let mut outbound = Vec::new();
        let mut events = Vec::new();

        // Our own transmission coming back with an H-bit set is the
        // digipeat evidence that ends fast retry.
        if frame.source.callsign == self.mycall
            && frame.digipeaters.iter().any(|d| d.flag)
        {
            self.note_digipeated(&frame.info);
            return (outbound, events);
        }

        let AprsData::Message(message) = data else {
            return (outbound, events);
        };
        let from = frame.source.callsign.to_string();

        match message.kind {
            MessageKind::Ack | MessageKind::Reject => {
                self.correlate(&from, message, now);
            }
            MessageKind::Message
            | MessageKind::Bulletin
            | MessageKind::Announcement => {
                self.monitor(&from, message, now);
                let to_us = message
                    .addressee
                    .parse::<Callsign>()
                    .map(|a| a.matches_base(&self.mycall))
                    .unwrap_or(false);
                if to_us && message.kind == MessageKind::Message {
                    if self.is_duplicate(&from, message, now) {
                        debug!("duplicate message from {from} suppressed");
                    } else {
                        let record = MessageRecord {
                            from: from.clone(),
                            to: message.addressee.clone(),
                            body: message.body.clone(),
                            message_id: message.id.clone(),
                            direction: Direction::Received,
                            timestamp: now,
                            state: DeliveryState::Acknowledged,
                            retries: 0,
                            first_transmit: None,
                            unread: true,
                        };
                        events.push(GateEvent::MessageReceived(json!({
                            "from": record.from,
                            "to": record.to,
                            "body": record.body,
                            "message_id": record.message_id,
                            "timestamp": record.timestamp,
                        })));
                        self.store.push(record);
                        if self.auto_ack {
                            if let Some(id) = &message.id {
                                let ack = AprsMessage::ack(&from, id);
                                outbound.push(Outbound::new(
                                    Frame::ui(
                                        self.mycall.clone(),
                                        TOCALL
                                            .parse()
                                            .expect("tocall is valid"),
                                        vec![Address::new(
                                            "WIDE1-1"
                                                .parse()
                                                .expect("valid alias"),
                                        )],
                                        ack.encode(),
                                    ),
                                    TxPriority::Ack,
                                ));
                            }
                        }
                    }
                }
            }
        }
        (outbound, events)
    }

    /// The retry ticker. Call about once a second.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Outbound> {
        let mut due = Vec::new();
        let mut finished = Vec::new();
        for (i, flight) in self.in_flight.iter_mut().enumerate() {
            let record = &mut self.store[flight.record];
            let interval = match record.state {
                DeliveryState::Pending => self.fast,
                DeliveryState::Digipeated => self.slow,
                _ => {
                    finished.push(i);
                    continue;
                }
            };
            if now - flight.last_transmit < interval {
                continue;
            }
            if record.retries >= self.retry_budget {
                info!(
                    "message {} to {} expired after {} retries",
                    record.message_id.as_deref().unwrap_or("-"),
                    record.to,
                    record.retries
                );
                record.state = DeliveryState::Expired;
                finished.push(i);
                continue;
            }
            record.retries += 1;
            flight.last_transmit = now;
            due.push((flight.record, flight.path.clone()));
        }
        for i in finished.into_iter().rev() {
            self.in_flight.remove(i);
        }
        due.into_iter()
            .map(|(record, path)| {
                Outbound::new(
                    self.message_frame(record, path),
                    TxPriority::Retry,
                )
            })
            .collect()
    }

    fn note_digipeated(&mut self, info: &[u8]) {
        for flight in &self.in_flight {
            let record = &mut self.store[flight.record];
            if record.state != DeliveryState::Pending {
                continue;
            }
            let ours = encode_record_info(record);
            let matches = ours == info
                || token_similarity(
                    &String::from_utf8_lossy(&ours),
                    &String::from_utf8_lossy(info),
                ) > FUZZY_THRESHOLD;
            if matches {
                info!(
                    "message {} heard digipeated, switching to slow retry",
                    record.message_id.as_deref().unwrap_or("-")
                );
                record.state = DeliveryState::Digipeated;
            }
        }
    }

    /// Ack or reject from the addressee stops retries.
    fn correlate(
        &mut self,
        from: &str,
        message: &AprsMessage,
        _now: DateTime<Utc>,
    ) {
        let Some(id) = &message.id else { return };
        let Ok(from_call) = from.parse::<Callsign>() else { return };
        let mut done = Vec::new();
        for (i, flight) in self.in_flight.iter().enumerate() {
            let record = &mut self.store[flight.record];
            let to_matches = record
                .to
                .parse::<Callsign>()
                .map(|c| c.matches_base(&from_call))
                .unwrap_or(false);
            if to_matches && record.message_id.as_deref() == Some(id) {
                record.state = if message.kind == MessageKind::Ack {
                    DeliveryState::Acknowledged
                } else {
                    DeliveryState::Rejected
                };
                info!("message {} {:?}", id, record.state);
                done.push(i);
            }
        }
        for i in done.into_iter().rev() {
            self.in_flight.remove(i);
        }
    }

    fn monitor(&mut self, from: &str, message: &AprsMessage, now: DateTime<Utc>) {
        while self.monitored.len() >= MAX_MONITORED {
            self.monitored.pop_front();
        }
        self.monitored.push_back(MessageRecord {
            from: from.to_string(),
            to: message.addressee.clone(),
            body: message.body.clone(),
            message_id: message.id.clone(),
            direction: Direction::Received,
            timestamp: now,
            state: DeliveryState::Acknowledged,
            retries: 0,
            first_transmit: None,
            unread: false,
        });
    }

    fn is_duplicate(
        &mut self,
        from: &str,
        message: &AprsMessage,
        now: DateTime<Utc>,
    ) -> bool {
        let horizon = now - Duration::seconds(DEDUP_WINDOW_SECS);
        while self
            .dedup
            .front()
            .is_some_and(|e| e.timestamp < horizon)
        {
            self.dedup.pop_front();
        }
        let duplicate = self.dedup.iter().any(|e| {
            e.from == from
                && e.to == message.addressee
                && e.id == message.id
                && (e.body == message.body
                    || token_similarity(&e.body, &message.body)
                        > FUZZY_THRESHOLD)
        });
        if !duplicate {
            self.dedup.push_back(DedupEntry {
                timestamp: now,
                from: from.to_string(),
                to: message.addressee.clone(),
                body: message.body.clone(),
                id: message.id.clone(),
            });
        }
        duplicate
    }

    /// Messages addressed to us (and our own sent messages).
    pub fn local_messages(&self, unread_only: bool) -> Vec<&MessageRecord> {
        self.store
            .iter()
            .filter(|m| !unread_only || m.unread)
            .collect()
    }

    /// Everything heard on the channel.
    pub fn monitored_messages(
        &self,
        limit: usize,
        callsign: Option<&str>,
    ) -> Vec<&MessageRecord> {
        self.monitored
            .iter()
            .rev()
            .filter(|m| {
                callsign.map_or(true, |c| m.from == c || m.to == c)
            })
            .take(limit)
            .collect()
    }

    pub fn mark_all_read(&mut self) {
        for record in &mut self.store {
            record.unread = false;
        }
    }
}

fn encode_record_info(record: &MessageRecord) -> Vec<u8> {
    AprsMessage {
        addressee: record.to.clone(),
        kind: MessageKind::Message,
        body: record.body.clone(),
        id: record.message_id.clone(),
    }
    .encode()
}

/// Levenshtein distance over whitespace tokens, normalized to a
/// similarity in [0, 1].
fn token_similarity(a: &str, b: &str) -> f64 {
    let ta: Vec<&str> = a.split_whitespace().collect();
    let tb: Vec<&str> = b.split_whitespace().collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let mut previous: Vec<usize> = (0..=tb.len()).collect();
    let mut current = vec![0; tb.len() + 1];
    for (i, token_a) in ta.iter().enumerate() {
        current[0] = i + 1;
        for (j, token_b) in tb.iter().enumerate() {
            let substitution =
                previous[j] + usize::from(token_a != token_b);
            current[j + 1] =
                substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    let distance = previous[tb.len()];
    1.0 - distance as f64 / ta.len().max(tb.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> MessageManager {
        MessageManager::new("K1FSY-9".parse().unwrap(), true, 3, 20, 600)
    }

    fn heard(
        manager: &mut MessageManager,
        source: &str,
        info: &[u8],
        now: DateTime<Utc>,
    ) -> (Vec<Outbound>, Vec<GateEvent>) {
        heard_via(manager, source, &[], info, now)
    }

    fn heard_via(
        manager: &mut MessageManager,
        source: &str,
        path: &[(&str, bool)],
        info: &[u8],
        now: DateTime<Utc>,
    ) -> (Vec<Outbound>, Vec<GateEvent>) {
        let frame = Frame::ui(
            source.parse().unwrap(),
            "APRS".parse().unwrap(),
            path.iter()
                .map(|(call, flag)| {
                    let mut a = Address::new(call.parse().unwrap());
                    a.flag = *flag;
                    a
                })
                .collect(),
            info.to_vec(),
        );
        let data = AprsData::decode(&frame).unwrap();
        manager.on_frame(&frame, &data, now)
    }

    #[test]
    fn send_then_ack() {
        let mut manager = manager();
        let now = Utc::now();
        let (id, first) = manager.send(
            &"W1ABC".parse().unwrap(),
            "Hello",
            vec![],
            now,
        );
        assert_eq!(first.priority, TxPriority::User);
        assert_eq!(
            manager.store[0].state,
            DeliveryState::Pending
        );

        let ack = format!(":K1FSY-9 :ack{id}");
        heard(&mut manager, "W1ABC", ack.as_bytes(), now);
        assert_eq!(manager.store[0].state, DeliveryState::Acknowledged);

        // No retransmission ever again.
        let due = manager.tick(now + Duration::seconds(3600));
        assert!(due.is_empty());
    }

    #[test]
    fn fast_retry_until_digipeated() {
        let mut manager = manager();
        let now = Utc::now();
        let (_, first) = manager.send(
            &"W1ABC".parse().unwrap(),
            "Hello",
            vec![],
            now,
        );

        // Fast interval passes: one retry due.
        let due = manager.tick(now + Duration::seconds(21));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].priority, TxPriority::Retry);

        // Our own frame comes back digipeated.
        let info = first.frame.info.clone();
        heard_via(
            &mut manager,
            "K1FSY-9",
            &[("W1XM", true)],
            &info,
            now + Duration::seconds(25),
        );
        assert_eq!(manager.store[0].state, DeliveryState::Digipeated);

        // Fast interval no longer triggers; slow does.
        let due = manager.tick(now + Duration::seconds(50));
        assert!(due.is_empty());
        let due = manager.tick(now + Duration::seconds(700));
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn retry_budget_expires() {
        let mut manager = manager();
        let mut now = Utc::now();
        manager.send(&"W1ABC".parse().unwrap(), "Hello", vec![], now);
        for _ in 0..3 {
            now += Duration::seconds(21);
            assert_eq!(manager.tick(now).len(), 1);
        }
        now += Duration::seconds(21);
        assert!(manager.tick(now).is_empty());
        assert_eq!(manager.store[0].state, DeliveryState::Expired);
    }

    #[test]
    fn incoming_message_acked_and_stored() {
        let mut manager = manager();
        let now = Utc::now();
        let (outbound, events) = heard(
            &mut manager,
            "W1ABC",
            b":K1FSY-9  :are you there?{042",
            now,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].priority, TxPriority::Ack);
        assert_eq!(&outbound[0].frame.info, b":W1ABC    :ack042");
        assert!(manager.local_messages(true).len() == 1);
    }

    #[test]
    fn ssid_agnostic_addressing() {
        let mut manager = manager();
        let now = Utc::now();
        // Addressed to our base call with a different SSID.
        let (outbound, events) = heard(
            &mut manager,
            "W1ABC",
            b":K1FSY    :base call match{7",
            now,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(outbound.len(), 1);
    }

    #[test]
    fn auto_ack_off() {
        let mut manager =
            MessageManager::new("K1FSY-9".parse().unwrap(), false, 3, 20, 600);
        let (outbound, events) = heard(
            &mut manager,
            "W1ABC",
            b":K1FSY-9  :no ack please{1",
            Utc::now(),
        );
        assert_eq!(events.len(), 1);
        assert!(outbound.is_empty());
    }

    #[test]
    fn exact_duplicate_suppressed() {
        let mut manager = manager();
        let now = Utc::now();
        heard(&mut manager, "W1ABC", b":K1FSY-9  :hello{10", now);
        let (outbound, events) = heard(
            &mut manager,
            "W1ABC",
            b":K1FSY-9  :hello{10",
            now + Duration::seconds(30),
        );
        assert!(events.is_empty());
        // The ack is still not re-sent for a suppressed duplicate.
        assert!(outbound.is_empty());
        assert_eq!(manager.local_messages(false).len(), 1);

        // Outside the window it is a new message again.
        let (_, events) = heard(
            &mut manager,
            "W1ABC",
            b":K1FSY-9  :hello{10",
            now + Duration::seconds(400),
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn fuzzy_duplicate_suppressed() {
        let mut manager = manager();
        let now = Utc::now();
        heard(
            &mut manager,
            "W1ABC",
            b":K1FSY-9  :meet me at the repeater site at noon{11",
            now,
        );
        // An iGate-mangled replay: same id, body differing in one token.
        let (_, events) = heard(
            &mut manager,
            "W1ABC",
            b":K1FSY-9  :meet me at the repeater site at  noon.{11",
            now + Duration::seconds(5),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn token_similarity_bounds() {
        assert_eq!(token_similarity("a b c", "a b c"), 1.0);
        assert!(token_similarity("a b c d e", "a b c d x") >= 0.8);
        assert!(token_similarity("hello there", "completely different") < 0.5);
        assert_eq!(token_similarity("", ""), 1.0);
    }

    #[test]
    fn monitored_ring() {
        let mut manager = manager();
        let now = Utc::now();
        heard(&mut manager, "W1ABC", b":W2DEF    :not for us{5", now);
        assert_eq!(manager.local_messages(false).len(), 0);
        assert_eq!(manager.monitored_messages(10, None).len(), 1);
        assert_eq!(
            manager.monitored_messages(10, Some("W2DEF")).len(),
            1
        );
        assert_eq!(
            manager.monitored_messages(10, Some("NOBODY")).len(),
            0
        );
    }
}
