/// KISS over TCP, the carrier for software TNCs (Dire Wolf, another
/// gateway's pass-through port, a remote sound modem).
use std::io;

use tokio::net::TcpStream;
use tracing::debug;

pub async fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    debug!("connecting to {host}:{port}");
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
