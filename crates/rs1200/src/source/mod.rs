/**
 * TNC transports.
 *
 * Three carriers deliver the same KISS byte stream: a Bluetooth-LE
 * handheld with an embedded TNC, a serial TNC, and a KISS-over-TCP
 * software TNC. [`spawn`] hides the difference behind a pair of channels
 * and a connection-state watch; a supervisor task reconnects with capped
 * exponential backoff whenever the carrier drops.
 */
#[cfg(feature = "ble")]
pub mod ble;
pub mod serial;
pub mod tcp;

use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::kiss::KissDecoder;

/// Reconnect backoff bounds.
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TncAddress {
    /// KISS over TCP: `tcp://host:port`.
    Tcp { host: String, port: u16 },
    /// Serial KISS TNC: `serial:/dev/ttyUSB0@9600`.
    Serial { path: String, baud: u32 },
    /// BLE handheld by MAC address: `ble:41:42:0B:98:0A:51`.
    Ble { mac: String },
}

impl FromStr for TncAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("tcp://") {
            let url = url::Url::parse(s).map_err(|e| e.to_string())?;
            let host = url
                .host_str()
                .ok_or("expected tcp://host:port".to_string())?;
            let port =
                url.port().ok_or("expected tcp://host:port".to_string())?;
            return Ok(TncAddress::Tcp { host: host.to_string(), port });
        }
        if let Some(rest) = s.strip_prefix("serial:") {
            let (path, baud) = match rest.rsplit_once('@') {
                Some((path, baud)) => (
                    path,
                    baud.parse()
                        .map_err(|e| format!("bad baud rate: {e}"))?,
                ),
                None => (rest, 1200),
            };
            if !(1200..=115_200).contains(&baud) {
                return Err(format!("baud rate {baud} out of range"));
            }
            return Ok(TncAddress::Serial { path: path.to_string(), baud });
        }
        if let Some(mac) = s.strip_prefix("ble:") {
            let valid = mac.len() == 17
                && mac.split(':').count() == 6
                && mac
                    .split(':')
                    .all(|g| g.len() == 2 && g.chars().all(|c| c.is_ascii_hexdigit()));
            if !valid {
                return Err(format!("bad BLE address {mac:?}"));
            }
            return Ok(TncAddress::Ble { mac: mac.to_uppercase() });
        }
        Err(format!("unsupported TNC address {s:?}"))
    }
}

impl fmt::Display for TncAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TncAddress::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            TncAddress::Serial { path, baud } => {
                write!(f, "serial:{path}@{baud}")
            }
            TncAddress::Ble { mac } => write!(f, "ble:{mac}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// The channel pair every consumer of the radio sees.
pub struct TncHandle {
    /// Raw KISS wire bytes to transmit (already FEND-framed).
    pub to_tnc: mpsc::Sender<Vec<u8>>,
    /// Complete KISS frames from the TNC, command byte at index 0.
    pub frames: mpsc::Receiver<Vec<u8>>,
    /// Connection state, updated by the supervisor.
    pub status: watch::Receiver<LinkStatus>,
}

/// Start the transport supervisor. `init` is sent to the TNC after every
/// (re)connect, typically the KISS TXDELAY/persistence/SlotTime setup.
pub fn spawn(address: TncAddress, init: Vec<Vec<u8>>) -> TncHandle {
    let (to_tnc, from_user) = mpsc::channel::<Vec<u8>>(64);
    let (frames_tx, frames) = mpsc::channel::<Vec<u8>>(256);
    let (status_tx, status) = watch::channel(LinkStatus::Disconnected);

    tokio::spawn(supervisor(address, init, from_user, frames_tx, status_tx));

    TncHandle { to_tnc, frames, status }
}

/// The AX.25 payloads of KISS data frames, as a stream. TNC parameter
/// acknowledgements and frames from other ports are filtered out.
pub fn data_frames(
    mut frames: mpsc::Receiver<Vec<u8>>,
) -> impl futures_util::stream::Stream<Item = Vec<u8>> {
    async_stream::stream! {
        while let Some(frame) = frames.recv().await {
            if frame.first() == Some(&0x00) {
                yield frame[1..].to_vec();
            }
        }
    }
}

async fn supervisor(
    address: TncAddress,
    init: Vec<Vec<u8>>,
    mut from_user: mpsc::Receiver<Vec<u8>>,
    frames_tx: mpsc::Sender<Vec<u8>>,
    status_tx: watch::Sender<LinkStatus>,
) {
    let mut backoff = BACKOFF_START;
    loop {
        let started = tokio::time::Instant::now();
        let result = match &address {
            TncAddress::Tcp { host, port } => {
                match tcp::connect(host, *port).await {
                    Ok(stream) => {
                        info!("connected to {address}");
                        let _ = status_tx.send(LinkStatus::Connected);
                        run_stream(
                            stream,
                            &init,
                            &mut from_user,
                            &frames_tx,
                        )
                        .await
                    }
                    Err(e) => Err(e),
                }
            }
            TncAddress::Serial { path, baud } => {
                match serial::open(path, *baud) {
                    Ok(stream) => {
                        info!("opened {address}");
                        let _ = status_tx.send(LinkStatus::Connected);
                        run_stream(
                            stream,
                            &init,
                            &mut from_user,
                            &frames_tx,
                        )
                        .await
                    }
                    Err(e) => Err(e),
                }
            }
            #[cfg(feature = "ble")]
            TncAddress::Ble { mac } => {
                ble::run(mac, &init, &mut from_user, &frames_tx, &status_tx)
                    .await
            }
            #[cfg(not(feature = "ble"))]
            TncAddress::Ble { .. } => {
                warn!(
                    "not compiled with BLE support, use the ble feature"
                );
                return;
            }
        };

        let _ = status_tx.send(LinkStatus::Disconnected);
        if frames_tx.is_closed() {
            return;
        }
        match result {
            Ok(()) => info!("{address} closed"),
            Err(e) => warn!("{address}: {e}"),
        }
        // A connection that held for a while earns a fresh backoff.
        if started.elapsed() > Duration::from_secs(60) {
            backoff = BACKOFF_START;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

/// Shovel bytes between a connected stream and the channel pair until
/// either side fails.
async fn run_stream<S>(
    stream: S,
    init: &[Vec<u8>],
    from_user: &mut mpsc::Receiver<Vec<u8>>,
    frames_tx: &mpsc::Sender<Vec<u8>>,
) -> io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    for frame in init {
        writer.write_all(frame).await?;
    }
    let mut decoder = KissDecoder::new();
    let mut buffer = [0u8; 1024];
    loop {
        tokio::select! {
            read = reader.read(&mut buffer) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                for frame in decoder.feed(&buffer[..n]) {
                    if frames_tx.send(frame).await.is_err() {
                        return Ok(());
                    }
                }
            }
            outgoing = from_user.recv() => {
                match outgoing {
                    Some(bytes) => writer.write_all(&bytes).await?,
                    // All senders gone: the application is shutting down.
                    None => return Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_addresses() {
        assert_eq!(
            "tcp://localhost:8001".parse::<TncAddress>().unwrap(),
            TncAddress::Tcp { host: "localhost".into(), port: 8001 }
        );
        assert_eq!(
            "serial:/dev/ttyUSB0@9600".parse::<TncAddress>().unwrap(),
            TncAddress::Serial { path: "/dev/ttyUSB0".into(), baud: 9600 }
        );
        assert_eq!(
            "serial:/dev/ttyS0".parse::<TncAddress>().unwrap(),
            TncAddress::Serial { path: "/dev/ttyS0".into(), baud: 1200 }
        );
        assert_eq!(
            "ble:41:42:0b:98:0a:51".parse::<TncAddress>().unwrap(),
            TncAddress::Ble { mac: "41:42:0B:98:0A:51".into() }
        );
    }

    #[test]
    fn reject_bad_addresses() {
        assert!("tcp://noport".parse::<TncAddress>().is_err());
        assert!("serial:/dev/ttyS0@300".parse::<TncAddress>().is_err());
        assert!("ble:xx".parse::<TncAddress>().is_err());
        assert!("http://x:1".parse::<TncAddress>().is_err());
    }

    #[tokio::test]
    async fn data_frames_filters_parameter_acks() {
        use futures_util::StreamExt;

        let (tx, rx) = mpsc::channel(8);
        tx.send(vec![0x00, b'a', b'b']).await.unwrap();
        tx.send(vec![0x01, 30]).await.unwrap();
        tx.send(vec![0x00, b'c']).await.unwrap();
        drop(tx);

        let stream = data_frames(rx);
        let collected: Vec<Vec<u8>> = stream.collect().await;
        assert_eq!(collected, vec![b"ab".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn tcp_round_trip() {
        use tokio::io::AsyncWriteExt;

        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // One KISS data frame to the client.
            sock.write_all(&crate::kiss::encode_data(b"from tnc"))
                .await
                .unwrap();
            // Then echo whatever arrives.
            let mut buf = [0u8; 256];
            let n = sock.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        });

        let mut handle = spawn(
            TncAddress::Tcp { host: "127.0.0.1".into(), port },
            vec![],
        );
        let frame = handle.frames.recv().await.unwrap();
        assert_eq!(&frame[1..], b"from tnc");

        handle
            .to_tnc
            .send(crate::kiss::encode_data(b"to tnc"))
            .await
            .unwrap();
        let echoed = server.await.unwrap();
        let mut decoder = KissDecoder::new();
        let frames = decoder.feed(&echoed);
        assert_eq!(&frames[0][1..], b"to tnc");
    }
}
