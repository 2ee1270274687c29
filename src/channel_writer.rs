//! Serializes writes to a channel's stdout/stderr through a background task, so a slow or
//! backed-up peer can't cause a handler task to deadlock against itself while writing.
//!
//! Near-verbatim port of `warpgate-protocol-ssh/src/server/channel_writer.rs`.

use bytes::Bytes;
use russh::server::Handle;
use russh::ChannelId;
use tokio::sync::{mpsc, oneshot};

enum WriteOp {
    Data(Bytes),
    ExtendedData { ext: u32, data: Bytes },
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct ChannelWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl ChannelWriter {
    pub fn new(handle: Handle, channel_id: ChannelId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    WriteOp::Data(data) => {
                        if handle.data(channel_id, data.into()).await.is_err() {
                            break;
                        }
                    }
                    WriteOp::ExtendedData { ext, data } => {
                        if handle
                            .extended_data(channel_id, ext, data.into())
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    WriteOp::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    pub fn write(&self, data: impl Into<Bytes>) {
        let _ = self.tx.send(WriteOp::Data(data.into()));
    }

    pub fn write_extended(&self, ext: u32, data: impl Into<Bytes>) {
        let _ = self.tx.send(WriteOp::ExtendedData {
            ext,
            data: data.into(),
        });
    }

    /// Waits for every write queued before this call to actually reach the handle.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}
