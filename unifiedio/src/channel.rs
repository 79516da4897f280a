use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Sink, SinkExt, Stream, ready};
use tokio_util::{bytes::Bytes, sync::PollSender};

use crate::{DatagramIO, UnderlyingIO};

/// An in-memory datagram channel, used to wire sessions together in tests
/// or to loop a resender back into a local consumer.
#[derive(Debug)]
pub struct ChannelIo {
    source: tokio::sync::mpsc::Receiver<Bytes>,
    sink: PollSender<Bytes>,
}

impl ChannelIo {
    pub fn new(
        source: tokio::sync::mpsc::Receiver<Bytes>,
        sink: tokio::sync::mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            source,
            sink: PollSender::new(sink),
        }
    }

    /// A connected pair of channel endpoints.
    pub fn pair(capacity: usize) -> (ChannelIo, ChannelIo) {
        let (a_tx, a_rx) = tokio::sync::mpsc::channel(capacity);
        let (b_tx, b_rx) = tokio::sync::mpsc::channel(capacity);
        (ChannelIo::new(a_rx, b_tx), ChannelIo::new(b_rx, a_tx))
    }
}

impl DatagramIO for ChannelIo {
    fn get_underlying_io_type(&self) -> UnderlyingIO {
        UnderlyingIO::Channel
    }
}

impl Sink<Bytes> for ChannelIo {
    type Error = std::io::Error;
    fn start_send(mut self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        self.sink
            .start_send_unpin(item)
            .map_err(|err| std::io::Error::other(err.to_string()))
    }

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.sink
            .poll_ready_unpin(cx)
            .map_err(|err| std::io::Error::other(err.to_string()))
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.sink
            .poll_close_unpin(cx)
            .map_err(|err| std::io::Error::other(err.to_string()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

impl Stream for ChannelIo {
    type Item = Result<Bytes, std::io::Error>;
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match ready!(self.source.poll_recv(cx)) {
            Some(bytes) => Poll::Ready(Some(Ok(bytes))),
            None => Poll::Ready(None),
        }
    }
}
