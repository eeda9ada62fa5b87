/**
 * The KISS-over-TCP pass-through (default port 8001).
 *
 * Third-party clients (APRS mappers, another terminal) share the radio:
 * everything the TNC hears is re-framed and broadcast to every client,
 * and every KISS data frame a client sends goes out through the
 * transmit scheduler like our own traffic. Client disconnects are
 * absorbed silently.
 */
use rs1200::ax25::Frame;
use rs1200::kiss::{self, KissDecoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::txqueue::{Outbound, TxPriority, TxScheduler};

pub async fn serve(
    port: u16,
    radio_rx: broadcast::Sender<Vec<u8>>,
    tx: TxScheduler,
) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("KISS bridge cannot bind port {port}: {e}");
            return;
        }
    };
    info!("KISS bridge listening on {port}");
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!("KISS client {peer} connected");
                let rx = radio_rx.subscribe();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = client(socket, rx, tx).await {
                        debug!("KISS client {peer}: {e}");
                    }
                    debug!("KISS client {peer} gone");
                });
            }
            Err(e) => {
                warn!("KISS bridge accept: {e}");
            }
        }
    }
}

async fn client(
    socket: TcpStream,
    mut radio_rx: broadcast::Receiver<Vec<u8>>,
    tx: TxScheduler,
) -> std::io::Result<()> {
    let (mut reader, mut writer) = socket.into_split();
    let mut decoder = KissDecoder::new();
    let mut buffer = [0u8; 1024];
    loop {
        tokio::select! {
            heard = radio_rx.recv() => {
                match heard {
                    Ok(payload) => {
                        writer.write_all(&kiss::encode_data(&payload)).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("KISS client lagged by {n} frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
            read = reader.read(&mut buffer) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                for kiss_frame in decoder.feed(&buffer[..n]) {
                    // Only data frames reach the radio; a client has no
                    // business changing TNC parameters.
                    if kiss_frame.first() != Some(&0x00) {
                        continue;
                    }
                    match Frame::decode(&kiss_frame[1..]) {
                        Ok(frame) => {
                            tx.push(Outbound::new(frame, TxPriority::User))
                                .await;
                        }
                        Err(e) => {
                            debug!("KISS client sent undecodable frame: {e}");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn broadcast_and_transmit() {
        let (radio_rx, _) = broadcast::channel::<Vec<u8>>(16);
        let (to_tnc, mut tnc_rx) = mpsc::channel::<Vec<u8>>(16);
        let (echo, _echo_rx) = mpsc::channel(16);
        let tx = TxScheduler::spawn(to_tnc, echo, 0);

        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let radio_rx_server = radio_rx.clone();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let rx = radio_rx_server.subscribe();
            let _ = client(socket, rx, tx).await;
        });

        let mut socket =
            TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Radio -> client.
        let frame = Frame::ui(
            "K1FSY-9".parse().unwrap(),
            "APRS".parse().unwrap(),
            vec![],
            b">hi".to_vec(),
        );
        radio_rx.send(frame.encode()).unwrap();
        let mut buffer = [0u8; 256];
        let n = socket.read(&mut buffer).await.unwrap();
        let mut decoder = KissDecoder::new();
        let frames = decoder.feed(&buffer[..n]);
        assert_eq!(
            Frame::decode(&frames[0][1..]).unwrap().to_string(),
            "K1FSY-9>APRS:>hi"
        );

        // Client -> radio.
        socket
            .write_all(&kiss::encode_data(&frame.encode()))
            .await
            .unwrap();
        let wire = tnc_rx.recv().await.unwrap();
        let mut decoder = KissDecoder::new();
        let frames = decoder.feed(&wire);
        assert_eq!(
            Frame::decode(&frames[0][1..]).unwrap().to_string(),
            "K1FSY-9>APRS:>hi"
        );
    }
}
