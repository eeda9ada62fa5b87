/// BLE handhelds with an embedded KISS TNC.
///
/// The radio exposes a vendor serial service: one notify characteristic
/// delivering KISS bytes (possibly mid-frame) and one write
/// characteristic accepting them. Writes are chunked to the negotiated
/// MTU.
use std::io;
use std::time::Duration;

use btleplug::api::{
    Central, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

use super::LinkStatus;
use crate::kiss::KissDecoder;

/// Vendor serial service and characteristics.
const RADIO_SERVICE: Uuid = Uuid::from_u128(0x00001100_d102_11e1_9b23_00025b00a5a5);
const WRITE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00001101_d102_11e1_9b23_00025b00a5a5);
const NOTIFY_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00001102_d102_11e1_9b23_00025b00a5a5);

/// Payload bytes per write after MTU negotiation.
const CHUNK: usize = 185;

const SCAN_TIMEOUT: Duration = Duration::from_secs(15);

fn other<E: std::error::Error + Send + Sync + 'static>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

async fn find_peripheral(mac: &str) -> io::Result<Peripheral> {
    let manager = Manager::new().await.map_err(other)?;
    let adapter = manager
        .adapters()
        .await
        .map_err(other)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no bluetooth adapter")
        })?;
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(other)?;

    let deadline = tokio::time::Instant::now() + SCAN_TIMEOUT;
    loop {
        for peripheral in adapter.peripherals().await.map_err(other)? {
            if peripheral.address().to_string().eq_ignore_ascii_case(mac) {
                let _ = adapter.stop_scan().await;
                return Ok(peripheral);
            }
        }
        if tokio::time::Instant::now() > deadline {
            let _ = adapter.stop_scan().await;
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("radio {mac} not found"),
            ));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

pub async fn run(
    mac: &str,
    init: &[Vec<u8>],
    from_user: &mut mpsc::Receiver<Vec<u8>>,
    frames_tx: &mpsc::Sender<Vec<u8>>,
    status_tx: &watch::Sender<LinkStatus>,
) -> io::Result<()> {
    let peripheral = find_peripheral(mac).await?;
    peripheral.connect().await.map_err(other)?;
    peripheral.discover_services().await.map_err(other)?;

    let characteristics = peripheral.characteristics();
    let notify = characteristics
        .iter()
        .find(|c| c.uuid == NOTIFY_CHARACTERISTIC)
        .cloned();
    let write = characteristics
        .iter()
        .find(|c| c.uuid == WRITE_CHARACTERISTIC)
        .cloned();
    let (Some(notify), Some(write)) = (notify, write) else {
        let _ = peripheral.disconnect().await;
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("radio lacks the {RADIO_SERVICE} serial service"),
        ));
    };

    peripheral.subscribe(&notify).await.map_err(other)?;
    let mut notifications =
        peripheral.notifications().await.map_err(other)?;
    info!("connected to radio {mac}");
    let _ = status_tx.send(LinkStatus::Connected);

    for frame in init {
        for chunk in frame.chunks(CHUNK) {
            peripheral
                .write(&write, chunk, WriteType::WithoutResponse)
                .await
                .map_err(other)?;
        }
    }

    let mut decoder = KissDecoder::new();
    loop {
        tokio::select! {
            notification = notifications.next() => {
                let Some(data) = notification else {
                    return Ok(());
                };
                if data.uuid != NOTIFY_CHARACTERISTIC {
                    continue;
                }
                debug!("notify {} bytes", data.value.len());
                for frame in decoder.feed(&data.value) {
                    if frames_tx.send(frame).await.is_err() {
                        let _ = peripheral.disconnect().await;
                        return Ok(());
                    }
                }
            }
            outgoing = from_user.recv() => {
                let Some(bytes) = outgoing else {
                    let _ = peripheral.disconnect().await;
                    return Ok(());
                };
                for chunk in bytes.chunks(CHUNK) {
                    peripheral
                        .write(&write, chunk, WriteType::WithoutResponse)
                        .await
                        .map_err(other)?;
                }
            }
        }
    }
}
