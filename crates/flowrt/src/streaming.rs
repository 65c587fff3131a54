//! `StreamingBridge`: the producer/consumer adapter between a flow body's
//! chunk emissions and the caller-visible output stream

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};

use crate::flow::error::FlowError;

/// A handle a flow body uses to push chunks to the caller
///
/// Unbounded by default, per §4.3 ("unbounded unless the host provides a
/// bounded implementation"); [`channel`] accepts a capacity to opt into
/// backpressure. Cloneable and type-erasable via [`StreamSender::erase`] /
/// [`StreamSender::typed`] so the engine's `AnyFlow` boundary can hold one
/// sender type (`serde_json::Value`) while a flow body works with its own
/// declared chunk type.
#[derive(Clone)]
pub struct StreamSender<C> {
    send_fn: Arc<dyn Fn(C) -> BoxFuture<'static, Result<(), FlowError>> + Send + Sync>,
}

impl<C: Send + 'static> StreamSender<C> {
    pub fn new(
        send_fn: impl Fn(C) -> BoxFuture<'static, Result<(), FlowError>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            send_fn: Arc::new(send_fn),
        }
    }

    pub async fn send(&self, chunk: C) -> Result<(), FlowError> {
        (self.send_fn)(chunk).await
    }

    /// Erase `C` behind `serde_json::Value` serialization, for crossing the
    /// `AnyFlow` type-erasure boundary.
    pub fn erase(self) -> StreamSender<serde_json::Value>
    where
        C: Serialize,
    {
        StreamSender::new(move |value: serde_json::Value| {
            let this = self.clone();
            Box::pin(async move {
                let chunk: C = serde_json::from_value(value)
                    .map_err(|e| FlowError::Validation(e.to_string()))?;
                this.send(chunk).await
            })
        })
    }
}

impl StreamSender<serde_json::Value> {
    /// The inverse of [`StreamSender::erase`]: recover a sender of a flow's
    /// own declared chunk type from the engine's `Value`-erased sender.
    pub fn typed<D>(&self) -> StreamSender<D>
    where
        D: Serialize + Send + 'static,
    {
        let this = self.clone();
        StreamSender::new(move |chunk: D| {
            let this = this.clone();
            Box::pin(async move {
                let value =
                    serde_json::to_value(&chunk).map_err(|e| FlowError::Validation(e.to_string()))?;
                this.send(value).await
            })
        })
    }
}

pub type ChunkStream<C> = BoxStream<'static, C>;

/// Build a chunk channel. `capacity = None` yields an unbounded channel.
pub fn channel<C: Send + 'static>(capacity: Option<usize>) -> (StreamSender<C>, ChunkStream<C>) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel::<C>(capacity);
            let sender = StreamSender::new(move |chunk| {
                let tx = tx.clone();
                Box::pin(async move {
                    tx.send(chunk)
                        .await
                        .map_err(|_| FlowError::Collaborator("stream consumer dropped".into()))
                })
            });
            (sender, ReceiverStream::new(rx).boxed())
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel::<C>();
            let sender = StreamSender::new(move |chunk| {
                let result = tx
                    .send(chunk)
                    .map_err(|_| FlowError::Collaborator("stream consumer dropped".into()));
                Box::pin(async move { result })
            });
            (sender, UnboundedReceiverStream::new(rx).boxed())
        }
    }
}

/// The pair `streamFlow` produces: a lazy, single-shot chunk stream and a
/// future resolving to the flow's output.
pub struct StreamFlowHandle<O, C> {
    pub stream: ChunkStream<C>,
    pub output: BoxFuture<'static, Result<O, FlowError>>,
    _marker: PhantomData<C>,
}

/// Drive a flow body that emits chunks through a [`StreamSender`].
///
/// Termination (§4.3): the stream closes once `make_body`'s sender is
/// dropped, which happens when the body future itself completes - always
/// after the last chunk was sent and always before `output` settles.
pub fn stream_flow<O, C, F, Fut>(capacity: Option<usize>, make_body: F) -> StreamFlowHandle<O, C>
where
    F: FnOnce(StreamSender<C>) -> Fut,
    Fut: Future<Output = Result<O, FlowError>> + Send + 'static,
    O: Send + 'static,
    C: Send + 'static,
{
    let (tx, stream) = channel(capacity);
    let body = make_body(tx);

    let output: BoxFuture<'static, Result<O, FlowError>> = Box::pin(async move {
        match body.await {
            Err(FlowError::Interrupted) => Err(FlowError::FlowStillRunning),
            other => other,
        }
    });

    StreamFlowHandle {
        stream,
        output,
        _marker: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_arrive_in_order_then_output_resolves() {
        let handle = stream_flow::<&'static str, i32, _, _>(None, |tx| async move {
            for i in 1..=3 {
                tx.send(i).await.unwrap();
            }
            Ok("ok")
        });

        let chunks: Vec<i32> = handle.stream.collect().await;
        assert_eq!(chunks, vec![1, 2, 3]);
        assert_eq!(handle.output.await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn interrupted_body_rejects_output_with_still_running() {
        let handle = stream_flow::<&'static str, i32, _, _>(None, |_tx| async move {
            Err(FlowError::Interrupted)
        });

        let chunks: Vec<i32> = handle.stream.collect().await;
        assert!(chunks.is_empty());
        assert!(matches!(handle.output.await, Err(FlowError::FlowStillRunning)));
    }

    #[tokio::test]
    async fn bounded_channel_respects_capacity_backpressure() {
        let (tx, mut stream) = channel::<i32>(Some(1));
        tx.send(1).await.unwrap();
        let sent2 = tx.send(2);
        tokio::pin!(sent2);
        tokio::select! {
            _ = &mut sent2 => panic!("second send should not resolve before a receive"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }
        assert_eq!(stream.next().await, Some(1));
        sent2.await.unwrap();
        assert_eq!(stream.next().await, Some(2));
    }

    #[tokio::test]
    async fn typed_sender_roundtrips_through_erased_value_sender() {
        let (erased, mut stream) = channel::<serde_json::Value>(None);
        let typed: StreamSender<i32> = erased.typed();
        typed.send(7).await.unwrap();
        assert_eq!(stream.next().await, Some(serde_json::json!(7)));
    }
}
