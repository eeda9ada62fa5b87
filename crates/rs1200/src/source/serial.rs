/// Serial KISS TNCs, 8N1 at the configured rate.
use std::io;

use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::debug;

pub fn open(path: &str, baud: u32) -> io::Result<SerialStream> {
    debug!("opening {path} at {baud} baud");
    let stream = tokio_serial::new(path, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .open_native_async()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(stream)
}
