/// The transmit scheduler: the single writer to the transport.
///
/// Exactly one frame is on the wire at a time. Within a priority class
/// transmission is FIFO; across classes acks beat retries beat user
/// traffic beats beacons. A send-gap derived from TXDELAY spaces
/// consecutive transmissions so a half-duplex TNC can key up.
use std::collections::VecDeque;
use std::time::Duration;

use rs1200::ax25::Frame;
use rs1200::kiss;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxPriority {
    Ack,
    Retry,
    User,
    Beacon,
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub frame: Frame,
    pub priority: TxPriority,
}

impl Outbound {
    pub fn new(frame: Frame, priority: TxPriority) -> Self {
        Outbound { frame, priority }
    }
}

pub struct TxScheduler {
    queue: mpsc::Sender<Outbound>,
}

impl Clone for TxScheduler {
    fn clone(&self) -> Self {
        TxScheduler { queue: self.queue.clone() }
    }
}

impl TxScheduler {
    /// Spawn the scheduler task. `to_tnc` carries raw KISS wire bytes;
    /// `echo` receives a copy of every transmitted frame so the rest of
    /// the pipeline (frame buffer, digipeat evidence) sees our own
    /// transmissions.
    pub fn spawn(
        to_tnc: mpsc::Sender<Vec<u8>>,
        echo: mpsc::Sender<Frame>,
        txdelay_10ms: u8,
    ) -> Self {
        let (queue, rx) = mpsc::channel::<Outbound>(256);
        tokio::spawn(run(rx, to_tnc, echo, txdelay_10ms));
        TxScheduler { queue }
    }

    pub async fn push(&self, outbound: Outbound) {
        if self.queue.send(outbound).await.is_err() {
            warn!("transmit scheduler is gone");
        }
    }

    pub fn try_push(&self, outbound: Outbound) {
        if self.queue.try_send(outbound).is_err() {
            warn!("transmit queue full, dropping frame");
        }
    }
}

async fn run(
    mut rx: mpsc::Receiver<Outbound>,
    to_tnc: mpsc::Sender<Vec<u8>>,
    echo: mpsc::Sender<Frame>,
    txdelay_10ms: u8,
) {
    // Keyup time plus a fixed settling margin between frames.
    let gap = Duration::from_millis(txdelay_10ms as u64 * 10 + 100);
    let mut classes: [VecDeque<Frame>; 4] = Default::default();
    loop {
        // Drain whatever is queued, then pick the best class.
        if classes.iter().all(VecDeque::is_empty) {
            match rx.recv().await {
                Some(out) => {
                    classes[class_index(out.priority)].push_back(out.frame)
                }
                None => return,
            }
        }
        while let Ok(out) = rx.try_recv() {
            classes[class_index(out.priority)].push_back(out.frame);
        }
        let Some(frame) =
            classes.iter_mut().find_map(VecDeque::pop_front)
        else {
            continue;
        };
        debug!("tx {}", frame);
        let wire = kiss::encode_data(&frame.encode());
        if to_tnc.send(wire).await.is_err() {
            return;
        }
        let _ = echo.send(frame).await;
        tokio::time::sleep(gap).await;
    }
}

fn class_index(priority: TxPriority) -> usize {
    match priority {
        TxPriority::Ack => 0,
        TxPriority::Retry => 1,
        TxPriority::User => 2,
        TxPriority::Beacon => 3,
    }
}
