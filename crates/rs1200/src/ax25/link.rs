/**
 * AX.25 v2.2 connected mode, one state machine per remote peer.
 *
 * The machine is sans-io: callers feed it local requests, received frames
 * and timer expiries through [`Link::handle`], and execute the returned
 * [`Action`]s (transmit a frame, deliver data, arm or cancel T1). All
 * sequencing is modulo 8 with a send window of 4.
 */
use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use super::{
    Address, Callsign, Control, Frame, Supervisory, Unnumbered, PID_NO_LAYER3,
};

pub const WINDOW_SIZE: usize = 4;
pub const MODULO: u8 = 8;
pub const DEFAULT_T1: Duration = Duration::from_secs(3);
pub const DEFAULT_RETRIES: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    AwaitingConnect,
    Connected,
    AwaitingDisconnect,
}

/// Why a link left the Connected (or connecting) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Local request completed.
    Local,
    /// Remote sent DISC.
    Remote,
    /// Remote answered SABM with DM.
    Refused,
    /// T1 expired more than N2 times.
    RetryExhausted,
    /// Remote reported a frame reject condition.
    FrameReject,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    ConnectRequest,
    DisconnectRequest,
    SendData(Vec<u8>),
    FrameReceived(Frame),
    T1Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Hand this frame to the transmit scheduler.
    Transmit(Frame),
    /// In-sequence I-frame payload for the application.
    Deliver(Vec<u8>),
    /// The link is established.
    Connected,
    /// The link is down.
    Disconnected(DisconnectReason),
    /// Arm (or re-arm) the T1 retransmission timer.
    StartT1(Duration),
    /// Cancel the T1 timer.
    StopT1,
}

pub struct Link {
    local: Callsign,
    peer: Callsign,
    path: Vec<Address>,
    state: LinkState,
    /// V(S): next sequence number to send.
    vs: u8,
    /// V(R): next sequence number expected.
    vr: u8,
    /// V(A): oldest unacknowledged sequence number.
    va: u8,
    queue: VecDeque<Vec<u8>>,
    in_flight: VecDeque<(u8, Vec<u8>)>,
    retries: u8,
    rej_outstanding: bool,
    peer_busy: bool,
    t1: Duration,
    max_retries: u8,
}

impl Link {
    pub fn new(local: Callsign, peer: Callsign, path: Vec<Address>) -> Self {
        Link {
            local,
            peer,
            path,
            state: LinkState::Disconnected,
            vs: 0,
            vr: 0,
            va: 0,
            queue: VecDeque::new(),
            in_flight: VecDeque::new(),
            retries: 0,
            rej_outstanding: false,
            peer_busy: false,
            t1: DEFAULT_T1,
            max_retries: DEFAULT_RETRIES,
        }
    }

    pub fn with_timing(mut self, t1: Duration, max_retries: u8) -> Self {
        self.t1 = t1;
        self.max_retries = max_retries;
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn peer(&self) -> &Callsign {
        &self.peer
    }

    /// In-flight, unacknowledged I-frames. Never exceeds [`WINDOW_SIZE`].
    pub fn outstanding(&self) -> usize {
        self.in_flight.len()
    }

    pub fn handle(&mut self, event: LinkEvent) -> Vec<Action> {
        match event {
            LinkEvent::ConnectRequest => self.on_connect_request(),
            LinkEvent::DisconnectRequest => self.on_disconnect_request(),
            LinkEvent::SendData(data) => self.on_send(data),
            LinkEvent::FrameReceived(frame) => self.on_frame(frame),
            LinkEvent::T1Expired => self.on_t1(),
        }
    }

    fn on_connect_request(&mut self) -> Vec<Action> {
        match self.state {
            LinkState::Disconnected => {
                self.state = LinkState::AwaitingConnect;
                self.retries = 0;
                vec![
                    Action::Transmit(self.control_frame(
                        Control::Unnumbered { kind: Unnumbered::Sabm, pf: true },
                        true,
                    )),
                    Action::StartT1(self.t1),
                ]
            }
            _ => vec![],
        }
    }

    fn on_disconnect_request(&mut self) -> Vec<Action> {
        match self.state {
            LinkState::Connected | LinkState::AwaitingConnect => {
                self.state = LinkState::AwaitingDisconnect;
                self.retries = 0;
                vec![
                    Action::Transmit(self.control_frame(
                        Control::Unnumbered { kind: Unnumbered::Disc, pf: true },
                        true,
                    )),
                    Action::StartT1(self.t1),
                ]
            }
            _ => vec![],
        }
    }

    fn on_send(&mut self, data: Vec<u8>) -> Vec<Action> {
        if self.state != LinkState::Connected {
            return vec![];
        }
        self.queue.push_back(data);
        self.pump()
    }

    fn on_t1(&mut self) -> Vec<Action> {
        match self.state {
            LinkState::AwaitingConnect => {
                if self.retries < self.max_retries {
                    self.retries += 1;
                    vec![
                        Action::Transmit(self.control_frame(
                            Control::Unnumbered {
                                kind: Unnumbered::Sabm,
                                pf: true,
                            },
                            true,
                        )),
                        Action::StartT1(self.t1),
                    ]
                } else {
                    self.reset();
                    vec![Action::Disconnected(DisconnectReason::RetryExhausted)]
                }
            }
            LinkState::AwaitingDisconnect => {
                if self.retries < self.max_retries {
                    self.retries += 1;
                    vec![
                        Action::Transmit(self.control_frame(
                            Control::Unnumbered {
                                kind: Unnumbered::Disc,
                                pf: true,
                            },
                            true,
                        )),
                        Action::StartT1(self.t1),
                    ]
                } else {
                    self.reset();
                    vec![Action::Disconnected(DisconnectReason::Local)]
                }
            }
            LinkState::Connected => {
                if self.in_flight.is_empty() {
                    return vec![Action::StopT1];
                }
                if self.retries < self.max_retries {
                    self.retries += 1;
                    let mut actions = self.retransmit_from(self.va);
                    actions.push(Action::StartT1(self.t1));
                    actions
                } else {
                    self.reset();
                    vec![Action::Disconnected(DisconnectReason::RetryExhausted)]
                }
            }
            LinkState::Disconnected => vec![],
        }
    }

    fn on_frame(&mut self, frame: Frame) -> Vec<Action> {
        match frame.control {
            Control::Unnumbered { kind, pf } => self.on_unnumbered(kind, pf),
            Control::Supervisory { kind, nr, pf } => {
                self.on_supervisory(kind, nr, pf)
            }
            Control::Information { ns, nr, pf } => {
                self.on_information(ns, nr, pf, frame.info)
            }
            // UI traffic is the APRS pipeline's business.
            Control::Ui { .. } => vec![],
        }
    }

    fn on_unnumbered(&mut self, kind: Unnumbered, pf: bool) -> Vec<Action> {
        match (self.state, kind) {
            (LinkState::Disconnected, Unnumbered::Sabm)
            | (LinkState::Connected, Unnumbered::Sabm) => {
                // Incoming connect, or a link reset while connected.
                let fresh = self.state == LinkState::Disconnected;
                self.state = LinkState::Connected;
                self.vs = 0;
                self.vr = 0;
                self.va = 0;
                self.retries = 0;
                self.in_flight.clear();
                self.rej_outstanding = false;
                let mut actions = vec![Action::Transmit(self.control_frame(
                    Control::Unnumbered { kind: Unnumbered::Ua, pf },
                    false,
                ))];
                if fresh {
                    actions.push(Action::Connected);
                }
                actions
            }
            (LinkState::AwaitingConnect, Unnumbered::Ua) => {
                self.state = LinkState::Connected;
                self.vs = 0;
                self.vr = 0;
                self.va = 0;
                self.retries = 0;
                vec![Action::StopT1, Action::Connected]
            }
            (LinkState::AwaitingConnect, Unnumbered::Dm) => {
                self.reset();
                vec![
                    Action::StopT1,
                    Action::Disconnected(DisconnectReason::Refused),
                ]
            }
            (LinkState::Connected, Unnumbered::Disc) => {
                let ua = self.control_frame(
                    Control::Unnumbered { kind: Unnumbered::Ua, pf },
                    false,
                );
                self.reset();
                vec![
                    Action::Transmit(ua),
                    Action::StopT1,
                    Action::Disconnected(DisconnectReason::Remote),
                ]
            }
            (LinkState::Disconnected, Unnumbered::Disc) => {
                // Not connected: answer with DM.
                vec![Action::Transmit(self.control_frame(
                    Control::Unnumbered { kind: Unnumbered::Dm, pf },
                    false,
                ))]
            }
            (
                LinkState::AwaitingDisconnect,
                Unnumbered::Ua | Unnumbered::Dm,
            ) => {
                self.reset();
                vec![
                    Action::StopT1,
                    Action::Disconnected(DisconnectReason::Local),
                ]
            }
            (LinkState::Connected, Unnumbered::Frmr) => {
                self.reset();
                vec![
                    Action::StopT1,
                    Action::Disconnected(DisconnectReason::FrameReject),
                ]
            }
            (state, kind) => {
                debug!("ignoring {kind:?} in {state:?}");
                vec![]
            }
        }
    }

    fn on_supervisory(
        &mut self,
        kind: Supervisory,
        nr: u8,
        _pf: bool,
    ) -> Vec<Action> {
        if self.state != LinkState::Connected {
            return vec![];
        }
        self.acknowledge_up_to(nr);
        let mut actions = Vec::new();
        match kind {
            Supervisory::Rr => {
                self.peer_busy = false;
                actions.extend(self.pump());
            }
            Supervisory::Rnr => {
                self.peer_busy = true;
            }
            Supervisory::Rej => {
                self.peer_busy = false;
                actions.extend(self.retransmit_from(nr));
            }
        }
        if self.in_flight.is_empty() && self.queue.is_empty() {
            actions.push(Action::StopT1);
        } else {
            actions.push(Action::StartT1(self.t1));
        }
        actions
    }

    fn on_information(
        &mut self,
        ns: u8,
        nr: u8,
        pf: bool,
        info: Vec<u8>,
    ) -> Vec<Action> {
        if self.state != LinkState::Connected {
            return vec![];
        }
        self.acknowledge_up_to(nr);
        let mut actions = self.pump();
        if ns == self.vr {
            self.vr = (self.vr + 1) % MODULO;
            self.rej_outstanding = false;
            actions.push(Action::Deliver(info));
            actions.push(Action::Transmit(self.control_frame(
                Control::Supervisory {
                    kind: Supervisory::Rr,
                    nr: self.vr,
                    pf,
                },
                false,
            )));
        } else if !self.rej_outstanding {
            // Out of sequence: one REJ per window.
            self.rej_outstanding = true;
            actions.push(Action::Transmit(self.control_frame(
                Control::Supervisory {
                    kind: Supervisory::Rej,
                    nr: self.vr,
                    pf,
                },
                false,
            )));
        }
        actions
    }

    /// Slide the send window: everything strictly before N(R) is acked.
    fn acknowledge_up_to(&mut self, nr: u8) {
        while let Some((ns, _)) = self.in_flight.front() {
            let acked = (nr + MODULO - self.va) % MODULO;
            let distance = (*ns + MODULO - self.va) % MODULO;
            if distance < acked {
                self.in_flight.pop_front();
                self.retries = 0;
            } else {
                break;
            }
        }
        self.va = nr;
    }

    /// Send queued data while the window allows.
    fn pump(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.peer_busy {
            return actions;
        }
        while self.in_flight.len() < WINDOW_SIZE {
            let Some(data) = self.queue.pop_front() else {
                break;
            };
            let ns = self.vs;
            self.vs = (self.vs + 1) % MODULO;
            self.in_flight.push_back((ns, data.clone()));
            actions.push(Action::Transmit(self.information_frame(ns, data)));
            actions.push(Action::StartT1(self.t1));
        }
        actions
    }

    /// REJ or T1: resend every in-flight frame at or after `nr`.
    fn retransmit_from(&mut self, nr: u8) -> Vec<Action> {
        let mut actions = Vec::new();
        for (ns, data) in self.in_flight.iter() {
            let distance = (*ns + MODULO - nr) % MODULO;
            if distance < WINDOW_SIZE as u8 {
                actions.push(Action::Transmit(
                    self.information_frame(*ns, data.clone()),
                ));
            }
        }
        actions
    }

    fn information_frame(&self, ns: u8, info: Vec<u8>) -> Frame {
        let mut frame = self.control_frame(
            Control::Information { ns, nr: self.vr, pf: false },
            true,
        );
        frame.pid = Some(PID_NO_LAYER3);
        frame.info = info;
        frame
    }

    /// A frame addressed to the peer. Command frames set the C bit on the
    /// destination, responses on the source.
    fn control_frame(&self, control: Control, command: bool) -> Frame {
        let mut destination = Address::new(self.peer.clone());
        let mut source = Address::new(self.local.clone());
        destination.flag = command;
        source.flag = !command;
        Frame {
            destination,
            source,
            digipeaters: self.path.clone(),
            control,
            pid: None,
            info: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.state = LinkState::Disconnected;
        self.vs = 0;
        self.vr = 0;
        self.va = 0;
        self.queue.clear();
        self.in_flight.clear();
        self.retries = 0;
        self.rej_outstanding = false;
        self.peer_busy = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> Link {
        Link::new(
            "N0CALL".parse().unwrap(),
            "W1AW-3".parse().unwrap(),
            vec![],
        )
    }

    fn transmitted(actions: &[Action]) -> Vec<&Frame> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Transmit(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn rx(control: Control) -> LinkEvent {
        rx_info(control, vec![])
    }

    fn rx_info(control: Control, info: Vec<u8>) -> LinkEvent {
        let mut frame = Frame::ui(
            "W1AW-3".parse().unwrap(),
            "N0CALL".parse().unwrap(),
            vec![],
            info,
        );
        frame.control = control;
        frame.pid = None;
        LinkEvent::FrameReceived(frame)
    }

    #[test]
    fn connect_handshake() {
        let mut link = link();
        let actions = link.handle(LinkEvent::ConnectRequest);
        let frames = transmitted(&actions);
        assert_eq!(
            frames[0].control,
            Control::Unnumbered { kind: Unnumbered::Sabm, pf: true }
        );
        assert!(frames[0].destination.flag);
        assert_eq!(link.state(), LinkState::AwaitingConnect);

        let actions = link.handle(rx(Control::Unnumbered {
            kind: Unnumbered::Ua,
            pf: true,
        }));
        assert!(actions.contains(&Action::Connected));
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn connect_refused() {
        let mut link = link();
        link.handle(LinkEvent::ConnectRequest);
        let actions = link.handle(rx(Control::Unnumbered {
            kind: Unnumbered::Dm,
            pf: true,
        }));
        assert!(actions
            .contains(&Action::Disconnected(DisconnectReason::Refused)));
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn connect_retry_exhaustion() {
        let mut link = link();
        link.handle(LinkEvent::ConnectRequest);
        for _ in 0..DEFAULT_RETRIES {
            let actions = link.handle(LinkEvent::T1Expired);
            assert_eq!(transmitted(&actions).len(), 1);
        }
        let actions = link.handle(LinkEvent::T1Expired);
        assert!(actions
            .contains(&Action::Disconnected(DisconnectReason::RetryExhausted)));
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn incoming_connect() {
        let mut link = link();
        let actions = link.handle(rx(Control::Unnumbered {
            kind: Unnumbered::Sabm,
            pf: true,
        }));
        let frames = transmitted(&actions);
        assert_eq!(
            frames[0].control,
            Control::Unnumbered { kind: Unnumbered::Ua, pf: true }
        );
        assert!(actions.contains(&Action::Connected));
    }

    fn connected() -> Link {
        let mut link = link();
        link.handle(LinkEvent::ConnectRequest);
        link.handle(rx(Control::Unnumbered { kind: Unnumbered::Ua, pf: true }));
        link
    }

    #[test]
    fn window_never_exceeded() {
        let mut link = connected();
        for i in 0..6u8 {
            link.handle(LinkEvent::SendData(vec![i]));
        }
        assert_eq!(link.outstanding(), WINDOW_SIZE);

        // RR(2) acknowledges two frames, releasing two more.
        let actions = link.handle(rx(Control::Supervisory {
            kind: Supervisory::Rr,
            nr: 2,
            pf: false,
        }));
        assert_eq!(transmitted(&actions).len(), 2);
        assert_eq!(link.outstanding(), WINDOW_SIZE);
    }

    #[test]
    fn acknowledged_frames_never_retransmitted() {
        let mut link = connected();
        link.handle(LinkEvent::SendData(b"first".to_vec()));
        link.handle(LinkEvent::SendData(b"second".to_vec()));
        link.handle(rx(Control::Supervisory {
            kind: Supervisory::Rr,
            nr: 2,
            pf: false,
        }));
        assert_eq!(link.outstanding(), 0);

        // T1 after a full ack retransmits nothing.
        let actions = link.handle(LinkEvent::T1Expired);
        assert!(transmitted(&actions).is_empty());
    }

    #[test]
    fn rej_triggers_retransmission() {
        let mut link = connected();
        for i in 0..3u8 {
            link.handle(LinkEvent::SendData(vec![i]));
        }
        let actions = link.handle(rx(Control::Supervisory {
            kind: Supervisory::Rej,
            nr: 1,
            pf: false,
        }));
        let frames = transmitted(&actions);
        // Frame 0 is acked; 1 and 2 go out again.
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            frames[0].control,
            Control::Information { ns: 1, .. }
        ));
        assert!(matches!(
            frames[1].control,
            Control::Information { ns: 2, .. }
        ));
    }

    #[test]
    fn in_sequence_receive() {
        let mut link = connected();
        let actions = link.handle(rx_info(
            Control::Information { ns: 0, nr: 0, pf: false },
            b"hello".to_vec(),
        ));
        assert!(actions.contains(&Action::Deliver(b"hello".to_vec())));
        let frames = transmitted(&actions);
        assert_eq!(
            frames[0].control,
            Control::Supervisory { kind: Supervisory::Rr, nr: 1, pf: false }
        );
    }

    #[test]
    fn out_of_sequence_rejected_once() {
        let mut link = connected();
        let actions = link.handle(rx_info(
            Control::Information { ns: 2, nr: 0, pf: false },
            b"skip".to_vec(),
        ));
        let frames = transmitted(&actions);
        assert_eq!(
            frames[0].control,
            Control::Supervisory { kind: Supervisory::Rej, nr: 0, pf: false }
        );

        // A second out-of-sequence frame inside the same window stays quiet.
        let actions = link.handle(rx_info(
            Control::Information { ns: 3, nr: 0, pf: false },
            b"skip2".to_vec(),
        ));
        assert!(transmitted(&actions).is_empty());
    }

    #[test]
    fn disconnect_handshake() {
        let mut link = connected();
        let actions = link.handle(LinkEvent::DisconnectRequest);
        assert_eq!(
            transmitted(&actions)[0].control,
            Control::Unnumbered { kind: Unnumbered::Disc, pf: true }
        );
        let actions = link.handle(rx(Control::Unnumbered {
            kind: Unnumbered::Ua,
            pf: true,
        }));
        assert!(
            actions.contains(&Action::Disconnected(DisconnectReason::Local))
        );
    }

    #[test]
    fn remote_disconnect() {
        let mut link = connected();
        let actions = link.handle(rx(Control::Unnumbered {
            kind: Unnumbered::Disc,
            pf: true,
        }));
        let frames = transmitted(&actions);
        assert_eq!(
            frames[0].control,
            Control::Unnumbered { kind: Unnumbered::Ua, pf: true }
        );
        assert!(
            actions.contains(&Action::Disconnected(DisconnectReason::Remote))
        );
    }
}
