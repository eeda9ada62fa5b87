/**
 * AGWPE protocol emulation (default port 8000).
 *
 * Clients speak 36-byte little-endian headers followed by a payload.
 * We answer the port queries, feed monitor records to clients that ask
 * for them, transmit UI and raw frames, and drive the AX.25 connected
 * mode engine for C/D/d requests, one link actor per remote peer.
 */
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use deku::prelude::*;
use rs1200::ax25::{Address, Callsign, Control, Frame};
use rs1200::prelude::{Action, Link, LinkEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::txqueue::{Outbound, TxPriority, TxScheduler};

/// Largest payload a client may send.
const MAX_DATA: u32 = 65_536;

/// The fixed frame header. Only `data_len` and `user` are wider than a
/// byte; the protocol is little-endian throughout.
#[derive(Debug, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct AgwpeHeader {
    #[deku(pad_bytes_after = "3")]
    pub port: u8,
    #[deku(pad_bytes_after = "1")]
    pub kind: u8,
    #[deku(pad_bytes_after = "1")]
    pub pid: u8,
    pub call_from: [u8; 10],
    pub call_to: [u8; 10],
    pub data_len: u32,
    pub user: u32,
}

impl AgwpeHeader {
    pub fn new(kind: u8, from: &str, to: &str, data_len: usize) -> Self {
        AgwpeHeader {
            port: 0,
            kind,
            pid: 0xF0,
            call_from: pack_call(from),
            call_to: pack_call(to),
            data_len: data_len as u32,
            user: 0,
        }
    }
}

fn pack_call(call: &str) -> [u8; 10] {
    let mut out = [0u8; 10];
    for (i, b) in call.bytes().take(9).enumerate() {
        out[i] = b;
    }
    out
}

fn unpack_call(bytes: &[u8; 10]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect::<String>()
        .trim()
        .to_string()
}

/// One header + payload, serialized.
fn message(kind: u8, from: &str, to: &str, payload: &[u8]) -> Vec<u8> {
    let header = AgwpeHeader::new(kind, from, to, payload.len());
    let mut bytes = header.to_bytes().expect("fixed header serializes");
    bytes.extend_from_slice(payload);
    bytes
}

#[derive(Default)]
struct ClientState {
    monitor: bool,
    kiss_monitor: bool,
    registered: HashSet<String>,
    links: HashMap<String, mpsc::Sender<LinkEvent>>,
}

pub async fn serve(
    port: u16,
    mycall: Callsign,
    frames: broadcast::Sender<Frame>,
    tx: TxScheduler,
) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("AGWPE bridge cannot bind port {port}: {e}");
            return;
        }
    };
    info!("AGWPE bridge listening on {port}");
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!("AGWPE client {peer} connected");
                let frames = frames.subscribe();
                let tx = tx.clone();
                let mycall = mycall.clone();
                tokio::spawn(async move {
                    client(socket, mycall, frames, tx).await;
                    debug!("AGWPE client {peer} gone");
                });
            }
            Err(e) => warn!("AGWPE accept: {e}"),
        }
    }
}

async fn client(
    socket: TcpStream,
    mycall: Callsign,
    frames: broadcast::Receiver<Frame>,
    tx: TxScheduler,
) {
    let (mut reader, writer) = socket.into_split();
    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(64);
    tokio::spawn(write_loop(writer, out_rx));

    let state = Arc::new(Mutex::new(ClientState::default()));
    let radio_task = tokio::spawn(radio_loop(
        frames,
        state.clone(),
        out_tx.clone(),
        mycall.clone(),
    ));

    let mut header_bytes = [0u8; 36];
    loop {
        if reader.read_exact(&mut header_bytes).await.is_err() {
            break;
        }
        let Ok((_, header)) = AgwpeHeader::from_bytes((&header_bytes, 0))
        else {
            break;
        };
        if header.data_len > MAX_DATA {
            warn!("AGWPE client requested {} bytes, closing", header.data_len);
            break;
        }
        let mut payload = vec![0u8; header.data_len as usize];
        if reader.read_exact(&mut payload).await.is_err() {
            break;
        }
        if !handle_command(
            &header,
            &payload,
            &state,
            &out_tx,
            &tx,
            &mycall,
        )
        .await
        {
            break;
        }
    }
    radio_task.abort();
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(bytes) = rx.recv().await {
        if writer.write_all(&bytes).await.is_err() {
            return;
        }
    }
}

/// Returns false when the connection should close.
async fn handle_command(
    header: &AgwpeHeader,
    payload: &[u8],
    state: &Arc<Mutex<ClientState>>,
    out: &mpsc::Sender<Vec<u8>>,
    tx: &TxScheduler,
    mycall: &Callsign,
) -> bool {
    let from = unpack_call(&header.call_from);
    let to = unpack_call(&header.call_to);
    match header.kind {
        b'G' => {
            let ports = b"1;Port1 KISS TNC (gate1200);";
            let _ = out.send(message(b'G', "", "", ports)).await;
        }
        b'g' => {
            // On-air baud, traffic level, tx delay, tx tail, persist,
            // slot time, max frame, active connections, bytes/s.
            let caps = [0u8, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0];
            let _ = out.send(message(b'g', "", "", &caps)).await;
        }
        b'm' => {
            let mut state = state.lock().await;
            state.monitor = !state.monitor;
            debug!("AGWPE monitor {}", state.monitor);
        }
        b'k' => {
            let mut state = state.lock().await;
            state.kiss_monitor = !state.kiss_monitor;
        }
        b'X' => {
            state.lock().await.registered.insert(from.clone());
            let _ = out.send(message(b'X', &from, "", &[1])).await;
        }
        b'x' => {
            state.lock().await.registered.remove(&from);
        }
        b'C' => {
            let Ok(peer) = to.parse::<Callsign>() else {
                return true;
            };
            let local = from
                .parse::<Callsign>()
                .unwrap_or_else(|_| mycall.clone());
            let events = spawn_link(
                local,
                peer.clone(),
                tx.clone(),
                out.clone(),
            );
            let _ = events.send(LinkEvent::ConnectRequest).await;
            state
                .lock()
                .await
                .links
                .insert(peer.to_string(), events);
        }
        b'D' => {
            let state = state.lock().await;
            if let Some(events) = state.links.get(&to) {
                let _ =
                    events.send(LinkEvent::SendData(payload.to_vec())).await;
            }
        }
        b'd' => {
            let state = state.lock().await;
            if let Some(events) = state.links.get(&to) {
                let _ = events.send(LinkEvent::DisconnectRequest).await;
            }
        }
        b'V' => {
            if let Some(frame) = parse_unproto(&from, &to, payload) {
                tx.push(Outbound::new(frame, TxPriority::User)).await;
            }
        }
        b'K' => {
            // Raw frame: a leading port byte, then AX.25 bytes.
            if payload.len() > 1 {
                match Frame::decode(&payload[1..]) {
                    Ok(frame) => {
                        tx.push(Outbound::new(frame, TxPriority::User)).await;
                    }
                    Err(e) => debug!("AGWPE raw frame: {e}"),
                }
            }
        }
        b'y' => {
            let _ = out
                .send(message(b'y', "", "", &0u32.to_le_bytes()))
                .await;
        }
        other => {
            debug!("AGWPE data kind {:?} unsupported", other as char);
        }
    }
    true
}

/// A `V` request: one count byte, that many 10-byte via calls, then the
/// information field.
fn parse_unproto(from: &str, to: &str, payload: &[u8]) -> Option<Frame> {
    let source: Callsign = from.parse().ok()?;
    let destination: Callsign = to.parse().ok()?;
    let count = *payload.first()? as usize;
    let mut path = Vec::with_capacity(count);
    let mut offset = 1;
    for _ in 0..count {
        let via = payload.get(offset..offset + 10)?;
        let mut bytes = [0u8; 10];
        bytes.copy_from_slice(via);
        path.push(Address::new(unpack_call(&bytes).parse().ok()?));
        offset += 10;
    }
    Some(Frame::ui(
        source,
        destination,
        path,
        payload[offset..].to_vec(),
    ))
}

/// Push heard frames to the client: monitor records and link traffic.
async fn radio_loop(
    mut frames: broadcast::Receiver<Frame>,
    state: Arc<Mutex<ClientState>>,
    out: mpsc::Sender<Vec<u8>>,
    mycall: Callsign,
) {
    loop {
        let frame = match frames.recv().await {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("AGWPE client lagged by {n} frames");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let state = state.lock().await;

        // Link traffic first: frames from a connected peer.
        if let Some(events) = state.links.get(&frame.source.callsign.to_string())
        {
            let ours = frame.destination.callsign.matches_base(&mycall)
                || state
                    .registered
                    .contains(&frame.destination.callsign.to_string());
            if ours && !matches!(frame.control, Control::Ui { .. }) {
                let _ =
                    events.send(LinkEvent::FrameReceived(frame.clone())).await;
                continue;
            }
        }

        if state.monitor {
            if let Some(record) = monitor_record(&frame) {
                if out.send(record).await.is_err() {
                    return;
                }
            }
        }
        if state.kiss_monitor {
            // Raw format: a port byte then the AX.25 frame verbatim.
            let mut raw = vec![0u8];
            raw.extend_from_slice(&frame.encode());
            let record = message(
                b'K',
                &frame.source.callsign.to_string(),
                &frame.destination.callsign.to_string(),
                &raw,
            );
            if out.send(record).await.is_err() {
                return;
            }
        }
    }
}

/// The text monitor record AGWPE clients render.
fn monitor_record(frame: &Frame) -> Option<Vec<u8>> {
    let kind = match frame.control {
        Control::Ui { .. } => b'U',
        Control::Information { .. } => b'I',
        _ => return None,
    };
    let via = if frame.digipeaters.is_empty() {
        String::new()
    } else {
        format!(
            " Via {}",
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
        )
    };
    let control = match frame.control {
        Control::Ui { .. } => "UI".to_string(),
        Control::Information { ns, nr, .. } => format!("I S{ns} R{nr}"),
        _ => unreachable!(),
    };
    let text = format!(
        "Fm {} To {}{} <{} pid={:02X} Len={} >[{}]\r{}\r",
        frame.source.callsign,
        frame.destination.callsign,
        via,
        control,
        frame.pid.unwrap_or(0xF0),
        frame.info.len(),
        Utc::now().format("%H:%M:%S"),
        String::from_utf8_lossy(&frame.info),
    );
    let mut payload = text.into_bytes();
    payload.push(0);
    Some(message(
        kind,
        &frame.source.callsign.to_string(),
        &frame.destination.callsign.to_string(),
        &payload,
    ))
}

/// One actor per connected-mode peer: owns the state machine and its T1
/// timer, translates actions into transmissions and client replies.
fn spawn_link(
    local: Callsign,
    peer: Callsign,
    tx: TxScheduler,
    out: mpsc::Sender<Vec<u8>>,
) -> mpsc::Sender<LinkEvent> {
    let (events_tx, mut events_rx) = mpsc::channel::<LinkEvent>(32);
    tokio::spawn(async move {
        let mut link = Link::new(local.clone(), peer.clone(), vec![]);
        let mut t1: Option<tokio::time::Instant> = None;
        loop {
            let event = match t1 {
                Some(deadline) => tokio::select! {
                    event = events_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = tokio::time::sleep_until(deadline) => {
                        t1 = None;
                        LinkEvent::T1Expired
                    }
                },
                None => match events_rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };
            let mut done = false;
            for action in link.handle(event) {
                match action {
                    Action::Transmit(frame) => {
                        tx.push(Outbound::new(frame, TxPriority::User)).await;
                    }
                    Action::StartT1(duration) => {
                        t1 = Some(tokio::time::Instant::now() + duration);
                    }
                    Action::StopT1 => t1 = None,
                    Action::Connected => {
                        let text = format!(
                            "*** CONNECTED To Station {peer}\r"
                        );
                        let _ = out
                            .send(message(
                                b'C',
                                &peer.to_string(),
                                &local.to_string(),
                                text.as_bytes(),
                            ))
                            .await;
                    }
                    Action::Deliver(data) => {
                        let _ = out
                            .send(message(
                                b'D',
                                &peer.to_string(),
                                &local.to_string(),
                                &data,
                            ))
                            .await;
                    }
                    Action::Disconnected(reason) => {
                        let text = format!(
                            "*** DISCONNECTED From Station {peer} ({reason:?})\r"
                        );
                        let _ = out
                            .send(message(
                                b'd',
                                &peer.to_string(),
                                &local.to_string(),
                                text.as_bytes(),
                            ))
                            .await;
                        done = true;
                    }
                }
            }
            if done {
                break;
            }
        }
    });
    events_tx
}
