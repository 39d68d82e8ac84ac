use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tokio::sync::mpsc;

/// Chunk size files are streamed to the agent in
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// File content streamed to the agent chunk by chunk.
///
/// The producer side is an `mpsc` sender; the body ends when every sender is
/// dropped. A producer that hits an error sends it as the last item, which
/// fails the upload.
#[derive(Debug)]
pub struct UploadBody {
    chunks: mpsc::Receiver<io::Result<Bytes>>,
}

impl UploadBody {
    /// A body fed through the returned sender, buffering up to `buffer` chunks
    pub fn channel(buffer: usize) -> (mpsc::Sender<io::Result<Bytes>>, Self) {
        let (sender, chunks) = mpsc::channel(buffer.max(1));
        (sender, Self { chunks })
    }

    /// A body holding `content` as a single chunk
    pub fn from_bytes(content: impl Into<Bytes>) -> Self {
        let (sender, body) = Self::channel(1);
        let _ = sender.try_send(Ok(content.into()));
        body
    }

    /// Collect the whole body
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        let chunks: Vec<Bytes> = self.try_collect().await?;
        Ok(Bytes::from(chunks.concat()))
    }
}

impl Stream for UploadBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_recv(cx)
    }
}

impl From<UploadBody> for reqwest::Body {
    fn from(body: UploadBody) -> Self {
        reqwest::Body::wrap_stream(body)
    }
}
