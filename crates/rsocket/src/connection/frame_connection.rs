use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::{FrameDecoder, FrameEncoder};
use crate::frame::Envelope;
use crate::protocol::ProtocolError;

const READ_CAPACITY: usize = 8 * 1024;

pin_project! {
    /// A duplex envelope connection over a byte reader and writer.
    ///
    /// Reads with [`FrameDecoder`] and writes with [`FrameEncoder`], so it works over any
    /// `AsyncRead`/`AsyncWrite` pair: TCP halves, `tokio::io::duplex` pipes, and so on.
    ///
    /// # Type Parameters
    ///
    /// * `R`: The async readable stream type
    /// * `W`: The async writable stream type
    #[derive(Debug)]
    pub struct FrameConnection<R, W> {
        #[pin]
        framed_read: FramedRead<R, FrameDecoder>,
        #[pin]
        framed_write: FramedWrite<W, FrameEncoder>,
    }
}

impl<R, W> FrameConnection<R, W>
where
    R: AsyncRead,
    W: AsyncWrite,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_decoder(reader, writer, FrameDecoder::new())
    }

    pub fn with_decoder(reader: R, writer: W, decoder: FrameDecoder) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, decoder, READ_CAPACITY),
            framed_write: FramedWrite::new(writer, FrameEncoder::new()),
        }
    }
}

impl<R, W> Stream for FrameConnection<R, W>
where
    R: AsyncRead,
{
    type Item = Result<Envelope, ProtocolError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().framed_read.poll_next(cx)
    }
}

impl<R, W> Sink<Envelope> for FrameConnection<R, W>
where
    W: AsyncWrite,
{
    type Error = ProtocolError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_write.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Envelope) -> Result<(), Self::Error> {
        self.project().framed_write.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_write.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_write.poll_close(cx)
    }
}
