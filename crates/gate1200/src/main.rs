#![doc = include_str!("../readme.md")]

mod agwpe;
mod bridge;
mod config;
mod digipeater;
mod events;
mod framebuf;
mod messages;
mod stations;
mod txqueue;
mod web;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use rs1200::aprs::AprsData;
use rs1200::ax25::link::{Action, Link, LinkEvent};
use rs1200::ax25::{Callsign, Control, Frame, Unnumbered};
use rs1200::kiss::{self, Command};
use rs1200::source::TncAddress;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use digipeater::Digipeater;
use events::EventBus;
use framebuf::{Direction, FrameBuffer};
use messages::MessageManager;
use stations::{RxSource, StationDb};
use txqueue::{Outbound, TxPriority, TxScheduler};
use web::WebState;

#[derive(Debug, Parser)]
#[command(
    name = "gate1200",
    version,
    author = "k1fsy",
    about = "Drive a KISS TNC and share it with KISS, AGWPE and web clients"
)]
struct Options {
    /// TNC endpoint: tcp://host:port, serial:/dev/tty...@baud or
    /// ble:MAC; overrides the configuration file
    tnc: Option<TncAddress>,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print every decoded frame
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Digipeat only frames that name our callsign, never WIDEn-N
    #[arg(long, default_value = "false")]
    direct_only: bool,
}

fn home_file(name: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(name)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Options::parse();
    let config_path = options.config.clone().unwrap_or_else(Config::path);
    let config = Config::load(&config_path);
    let mycall = config.mycall();
    info!("gate1200 up as {mycall}");

    let Some(address) = options.tnc.clone().or_else(|| config.tnc()) else {
        return Err("no TNC configured: pass an endpoint or set \
                    TNC_ADDRESS/RADIO_MAC in the config"
            .into());
    };

    let stations_path = home_file(".aprs_stations.json.gz");
    let framebuf_path = home_file(".console_frame_buffer.json.gz");
    let stations = Arc::new(Mutex::new(StationDb::load(&stations_path)));
    let framebuf = Arc::new(Mutex::new(FrameBuffer::load(
        &framebuf_path,
        config.debug_buffer_bytes(),
    )));
    let messages = Arc::new(Mutex::new(MessageManager::new(
        mycall.clone(),
        config.auto_ack,
        config.retry,
        config.retry_fast,
        config.retry_slow,
    )));
    let bus = EventBus::new();

    // TNC parameters pushed at every (re)connect; CSMA stays on the TNC.
    let init = vec![
        kiss::encode_parameter(0, Command::TxDelay, config.txdelay),
        kiss::encode_parameter(0, Command::Persistence, 63),
        kiss::encode_parameter(0, Command::SlotTime, 10),
    ];
    let mut tnc = rs1200::source::spawn(address, init);

    let (echo_tx, mut echo_rx) = mpsc::channel::<Frame>(64);
    let tx = TxScheduler::spawn(tnc.to_tnc.clone(), echo_tx, config.txdelay);

    // Fan-out to the two bridges.
    let (kiss_feed, _) = broadcast::channel::<Vec<u8>>(64);
    let (frame_feed, _) = broadcast::channel::<Frame>(64);
    tokio::spawn(bridge::serve(
        config.tnc_port,
        kiss_feed.clone(),
        tx.clone(),
    ));
    tokio::spawn(agwpe::serve(
        config.agwpe_port,
        mycall.clone(),
        frame_feed.clone(),
        tx.clone(),
    ));

    let shared_config = Arc::new(Mutex::new(config.clone()));
    tokio::spawn(web::serve(
        WebState {
            stations: stations.clone(),
            messages: messages.clone(),
            config: shared_config.clone(),
            config_path: config_path.clone(),
            events: bus.clone(),
            tx: tx.clone(),
            started: Utc::now(),
        },
        config.webui_port,
    ));

    // Message retry ticker.
    {
        let messages = messages.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(1)).await;
                let due = messages.lock().await.tick(Utc::now());
                for outbound in due {
                    tx.push(outbound).await;
                }
            }
        });
    }

    // Periodic persistence.
    {
        let stations = stations.clone();
        let framebuf = framebuf.clone();
        let stations_path = stations_path.clone();
        let framebuf_path = framebuf_path.clone();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(300)).await;
                if let Err(e) = stations.lock().await.save(&stations_path) {
                    warn!("station save: {e}");
                }
                if let Err(e) = framebuf.lock().await.save(&framebuf_path) {
                    warn!("frame buffer save: {e}");
                }
            }
        });
    }

    let mut digipeater = config.digipeat.then(|| {
        Digipeater::new(
            mycall.clone(),
            config.digi_aliases(),
            options.direct_only,
        )
    });

    // Connected-mode peers that reached us outside any AGWPE client.
    let mut links: HashMap<String, mpsc::Sender<LinkEvent>> = HashMap::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c => break,
            echoed = echo_rx.recv() => {
                let Some(frame) = echoed else { break };
                let wire = kiss::encode_data(&frame.encode());
                framebuf.lock().await.push(Direction::Tx, &wire, Utc::now());
            }
            received = tnc.frames.recv() => {
                let Some(kiss_frame) = received else { break };
                framebuf.lock().await.push(
                    Direction::Rx,
                    &kiss::reframe(&kiss_frame),
                    Utc::now(),
                );
                if kiss_frame.first() != Some(&0x00) {
                    continue;
                }
                let payload = &kiss_frame[1..];
                let _ = kiss_feed.send(payload.to_vec());

                let frame = match Frame::decode(payload) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("undecodable frame: {e}");
                        continue;
                    }
                };
                if options.verbose {
                    println!("{frame}");
                }
                let _ = frame_feed.send(frame.clone());

                process_frame(
                    &frame,
                    &mycall,
                    &stations,
                    &messages,
                    &mut digipeater,
                    &mut links,
                    &bus,
                    &tx,
                )
                .await;
            }
        }
    }

    // Give the transmit scheduler a grace period to drain, then persist.
    info!("shutting down");
    sleep(Duration::from_secs(2)).await;
    stations.lock().await.save(&stations_path)?;
    framebuf.lock().await.save(&framebuf_path)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn process_frame(
    frame: &Frame,
    mycall: &Callsign,
    stations: &Arc<Mutex<StationDb>>,
    messages: &Arc<Mutex<MessageManager>>,
    digipeater: &mut Option<Digipeater>,
    links: &mut HashMap<String, mpsc::Sender<LinkEvent>>,
    bus: &EventBus,
    tx: &TxScheduler,
) {
    let now = Utc::now();

    if frame.is_aprs() {
        match AprsData::decode(frame) {
            Ok(data) => {
                let events = stations
                    .lock()
                    .await
                    .ingest(frame, &data, RxSource::Rf, now);
                for event in events {
                    bus.publish(event);
                }
                let (outbound, events) =
                    messages.lock().await.on_frame(frame, &data, now);
                for out in outbound {
                    tx.push(out).await;
                }
                for event in events {
                    bus.publish(event);
                }
            }
            Err(e) => debug!("APRS decode failed for {frame}: {e}"),
        }
    }

    if let Some(digipeater) = digipeater {
        if let Some(repeated) = digipeater.process(frame, now) {
            tx.push(Outbound::new(repeated, TxPriority::User)).await;
        }
    }

    // Connected-mode traffic addressed to us with no AGWPE client
    // holding the link: answer it ourselves. A responder exists only
    // once the peer opened with SABM, so links driven by an AGWPE
    // client are left alone.
    if !matches!(frame.control, Control::Ui { .. })
        && frame.destination.callsign.matches_base(mycall)
    {
        let peer = frame.source.callsign.to_string();
        let opening = matches!(
            frame.control,
            Control::Unnumbered { kind: Unnumbered::Sabm, .. }
        );
        if links.contains_key(&peer) || opening {
            let events = links.entry(peer.clone()).or_insert_with(|| {
                spawn_responder(
                    mycall.clone(),
                    frame.source.callsign.clone(),
                    tx.clone(),
                )
            });
            if events
                .send(LinkEvent::FrameReceived(frame.clone()))
                .await
                .is_err()
            {
                links.remove(&peer);
            }
        }
    }
}

/// A minimal connected-mode responder: accepts the link, logs whatever
/// the peer sends, lets them disconnect.
fn spawn_responder(
    local: Callsign,
    peer: Callsign,
    tx: TxScheduler,
) -> mpsc::Sender<LinkEvent> {
    let (events_tx, mut events_rx) = mpsc::channel::<LinkEvent>(32);
    tokio::spawn(async move {
        let mut link = Link::new(local, peer.clone(), vec![]);
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
            for action in link.handle(event) {
                match action {
                    Action::Transmit(frame) => {
                        tx.push(Outbound::new(frame, TxPriority::User)).await;
                    }
                    Action::StartT1(duration) => {
                        t1 = Some(tokio::time::Instant::now() + duration);
                    }
                    Action::StopT1 => t1 = None,
                    Action::Connected => info!("{peer} connected to us"),
                    Action::Deliver(data) => {
                        info!("{peer}: {}", String::from_utf8_lossy(&data));
                    }
                    Action::Disconnected(reason) => {
                        info!("{peer} disconnected ({reason:?})");
                        return;
                    }
                }
            }
        }
    });
    events_tx
}
