/**
 * KISS framing, as spoken between a host and a TNC.
 *
 * A frame is an opaque payload preceded by one command byte, wrapped in
 * FEND sentinels with SLIP-style escapes:
 *
 * | byte  | value | escaped as  |
 * | ----- | ----- | ----------- |
 * | FEND  | 0xC0  | FESC, TFEND |
 * | FESC  | 0xDB  | FESC, TFESC |
 *
 * The command byte carries the TNC port in its high nibble and the frame
 * type in its low nibble. Type 0 is data; types 1..=6 set TXDELAY,
 * P-persistence, SlotTime, TXtail, full-duplex and hardware parameters.
 */
use thiserror::Error;
use tracing::debug;

pub const FEND: u8 = 0xC0;
pub const FESC: u8 = 0xDB;
pub const TFEND: u8 = 0xDC;
pub const TFESC: u8 = 0xDD;

/// Frames larger than this are assumed to be line noise and dropped.
const MAX_FRAME: usize = 8192;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum Command {
    Data = 0,
    TxDelay = 1,
    Persistence = 2,
    SlotTime = 3,
    TxTail = 4,
    FullDuplex = 5,
    SetHardware = 6,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("invalid escape sequence FESC {0:#04x}")]
    BadEscape(u8),
    #[error("frame exceeds {MAX_FRAME} bytes")]
    Oversize,
}

/// Wrap a command byte and payload in FEND/FESC framing.
///
/// A leading FEND is emitted as well, some TNCs require one to resync.
pub fn encode(port: u8, command: Command, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(FEND);
    push_escaped(&mut out, (port << 4) | command as u8);
    for &byte in payload {
        push_escaped(&mut out, byte);
    }
    out.push(FEND);
    out
}

/// Shorthand for the common case: a data frame on port 0.
pub fn encode_data(payload: &[u8]) -> Vec<u8> {
    encode(0, Command::Data, payload)
}

/// A one-byte TNC parameter frame (TXDELAY, P, SlotTime, TXtail, duplex).
pub fn encode_parameter(port: u8, command: Command, value: u8) -> Vec<u8> {
    encode(port, command, &[value])
}

/// Re-wrap decoded frame content (command byte included) for the wire,
/// e.g. to archive or re-broadcast a frame exactly as framed.
pub fn reframe(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 2);
    out.push(FEND);
    for &byte in content {
        push_escaped(&mut out, byte);
    }
    out.push(FEND);
    out
}

fn push_escaped(out: &mut Vec<u8>, byte: u8) {
    match byte {
        FEND => out.extend_from_slice(&[FESC, TFEND]),
        FESC => out.extend_from_slice(&[FESC, TFESC]),
        _ => out.push(byte),
    }
}

/// Streaming KISS decoder.
///
/// Feed it bytes as they arrive from the transport; completed frames come
/// back with the command byte still at index 0. An FEND both terminates
/// the accumulator and opens the next frame, so back-to-back frames and
/// keep-alive FEND runs are handled transparently.
#[derive(Debug, Default)]
pub struct KissDecoder {
    accumulator: Vec<u8>,
    escaped: bool,
    poisoned: bool,
    /// Count of frames dropped on a framing error, for observability.
    pub errors: u64,
}

impl KissDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of bytes, returning every frame completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &byte in bytes {
            if self.escaped {
                self.escaped = false;
                match byte {
                    TFEND => self.accumulator.push(FEND),
                    TFESC => self.accumulator.push(FESC),
                    _ => {
                        debug!("{}", FramingError::BadEscape(byte));
                        self.errors += 1;
                        self.poison();
                    }
                }
                continue;
            }
            match byte {
                FEND => {
                    // A single byte between two FENDs is noise from a TNC
                    // powering up, not a frame.
                    if !self.poisoned && self.accumulator.len() > 1 {
                        frames.push(std::mem::take(&mut self.accumulator));
                    }
                    self.accumulator.clear();
                    self.poisoned = false;
                }
                FESC => self.escaped = true,
                _ if self.poisoned => {}
                _ => {
                    if self.accumulator.len() >= MAX_FRAME {
                        debug!("{}", FramingError::Oversize);
                        self.errors += 1;
                        self.poison();
                    } else {
                        self.accumulator.push(byte);
                    }
                }
            }
        }
        frames
    }

    /// Discard everything until the next FEND.
    fn poison(&mut self) {
        self.accumulator.clear();
        self.escaped = false;
        self.poisoned = true;
    }
}
