//! Loopback TCP endpoints.

use std::io;
use std::net::Ipv4Addr;

use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Bind `127.0.0.1:port`, accept one peer and stop listening.
pub(super) async fn accept_one(port: u16) -> io::Result<TcpStream> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    let (stream, peer_addr) = listener.accept().await?;
    stream.set_nodelay(true)?;
    debug!("Accepted TCP peer {} on port {}", peer_addr, port);
    Ok(stream)
}

pub(super) async fn connect(port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
