//! Adapts a channel's pushed data events (delivered via the `russh::server::Handler::data` /
//! `extended_data` callbacks and routed through [`crate::conn::ConnContext::route_channel_event`])
//! and a [`crate::channel_writer::ChannelWriter`] into a single `AsyncRead + AsyncWrite` stream —
//! the shape [`crate::tunnel::tunnel`] expects.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::channel_writer::ChannelWriter;
use crate::conn::ChannelEvent;

pub struct ChannelStream {
    events: UnboundedReceiver<ChannelEvent>,
    pending: Option<Bytes>,
    writer: ChannelWriter,
    eof: bool,
}

impl ChannelStream {
    pub fn new(events: UnboundedReceiver<ChannelEvent>, writer: ChannelWriter) -> Self {
        Self {
            events,
            pending: None,
            writer,
            eof: false,
        }
    }
}

impl AsyncRead for ChannelStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if let Some(pending) = &mut self.pending {
                let n = pending.remaining().min(buf.remaining());
                buf.put_slice(&pending[..n]);
                pending.advance(n);
                if !pending.has_remaining() {
                    self.pending = None;
                }
                return Poll::Ready(Ok(()));
            }
            if self.eof {
                return Poll::Ready(Ok(()));
            }
            match self.events.poll_recv(cx) {
                Poll::Ready(Some(ChannelEvent::Data(data))) | Poll::Ready(Some(ChannelEvent::ExtendedData { data, .. })) => {
                    if data.is_empty() {
                        continue;
                    }
                    self.pending = Some(data);
                }
                Poll::Ready(Some(ChannelEvent::Eof)) | Poll::Ready(None) => {
                    self.eof = true;
                }
                Poll::Ready(Some(ChannelEvent::Close)) => {
                    self.eof = true;
                }
                Poll::Ready(Some(ChannelEvent::Request { reply, .. })) => {
                    // A forwarded/direct channel is never expected to field session requests, but
                    // answer defensively rather than leaving the peer's reply hanging.
                    let _ = reply.send(false);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for ChannelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.writer.write(Bytes::copy_from_slice(buf));
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
