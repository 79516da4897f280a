use std::net::SocketAddr;

use futures::{Sink, Stream};
use tokio_util::bytes::Bytes;

pub mod channel;
mod errors;
pub mod udp;

pub use errors::{UnifiedIOError, UnifiedIOResult};

#[derive(Debug, Clone, Copy)]
pub enum UnderlyingIO {
    Udp {
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
    },
    Channel,
}

/// A datagram channel: every `Bytes` in or out is one datagram. Both the
/// media stream and the control stream run over one of these.
pub trait DatagramIO:
    Stream<Item = Result<Bytes, std::io::Error>> + Sink<Bytes, Error = std::io::Error> + Send
{
    fn get_underlying_io_type(&self) -> UnderlyingIO;
}
