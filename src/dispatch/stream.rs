use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;

use crate::providers::Error;

pub(crate) type TokenItem = Result<String, Error>;

/// The text of a completion, chunk by chunk. Single pass; dropping it stops
/// the completion.
pub(crate) struct TokenStream {
    rx: mpsc::Receiver<TokenItem>,
}

impl TokenStream {
    pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<TokenItem>, TokenStream) {
        let (tx, rx) = mpsc::channel(capacity);

        (tx, TokenStream { rx })
    }

    /// A stream made of a single chunk.
    pub(crate) fn once(chunk: String) -> TokenStream {
        let (tx, stream) = Self::channel(1);

        // Capacity is one and the receiver is alive
        let _ = tx.try_send(Ok(chunk));

        stream
    }
}

impl Stream for TokenStream {
    type Item = TokenItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
