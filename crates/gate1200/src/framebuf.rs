/// The raw-frame ring: every KISS frame in or out, kept for debugging
/// and replay, bounded by the DEBUG_BUFFER byte cap and persisted
/// across restarts.
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Rx,
    Tx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedFrame {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Raw KISS bytes, hex encoded.
    pub kiss: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FrameBuffer {
    frames: VecDeque<BufferedFrame>,
    next_seq: u64,
    #[serde(skip)]
    bytes: usize,
    #[serde(skip, default = "default_cap")]
    cap: usize,
}

fn default_cap() -> usize {
    10 * 1024 * 1024
}

impl FrameBuffer {
    pub fn new(cap: usize) -> Self {
        FrameBuffer {
            frames: VecDeque::new(),
            next_seq: 0,
            bytes: 0,
            cap,
        }
    }

    pub fn push(
        &mut self,
        direction: Direction,
        kiss: &[u8],
        now: DateTime<Utc>,
    ) {
        self.bytes += kiss.len();
        self.frames.push_back(BufferedFrame {
            seq: self.next_seq,
            timestamp: now,
            direction,
            kiss: hex::encode(kiss),
        });
        self.next_seq += 1;
        while self.bytes > self.cap {
            match self.frames.pop_front() {
                Some(old) => self.bytes -= old.kiss.len() / 2,
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let tmp = path.with_extension("tmp");
        let file = std::fs::File::create(&tmp)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&serde_json::to_vec(self)?)?;
        encoder.finish()?;
        std::fs::rename(&tmp, path)
    }

    pub fn load(path: &Path, cap: usize) -> Self {
        let mut buffer = FrameBuffer::new(cap);
        let Ok(file) = std::fs::File::open(path) else {
            return buffer;
        };
        let mut decoder = GzDecoder::new(file);
        let mut bytes = Vec::new();
        if decoder.read_to_end(&mut bytes).is_err() {
            warn!("{}: unreadable frame buffer, starting fresh", path.display());
            return buffer;
        }
        match serde_json::from_slice::<FrameBuffer>(&bytes) {
            Ok(loaded) => {
                buffer.frames = loaded.frames;
                buffer.next_seq = loaded.next_seq;
                buffer.bytes =
                    buffer.frames.iter().map(|f| f.kiss.len() / 2).sum();
            }
            Err(e) => {
                warn!("{}: {e}, starting fresh", path.display());
            }
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_dropped_at_cap() {
        let mut buffer = FrameBuffer::new(100);
        for i in 0..20u8 {
            buffer.push(Direction::Rx, &[i; 10], Utc::now());
        }
        assert!(buffer.len() <= 10);
        // Sequence numbers keep counting across drops.
        assert_eq!(buffer.frames.back().unwrap().seq, 19);
    }

    #[test]
    fn save_load_round_trip() {
        let mut buffer = FrameBuffer::new(1024);
        buffer.push(Direction::Rx, &[0xC0, 0x00, 0x41, 0xC0], Utc::now());
        buffer.push(Direction::Tx, &[0xC0, 0x00, 0x42, 0xC0], Utc::now());

        let path = std::env::temp_dir().join("gate1200_test_framebuf.json.gz");
        buffer.save(&path).unwrap();
        let loaded = FrameBuffer::load(&path, 1024);
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.frames[0].kiss, "c00041c0");
        assert_eq!(loaded.frames[1].direction, Direction::Tx);
    }
}
