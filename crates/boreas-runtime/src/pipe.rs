//! Bounded single-producer/single-consumer tuple channels

use crate::context::Context;
use crate::error::FlowError;
use crate::operator::Writer;
use crate::tuple::Tuple;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

/// Receiving half of a pipe. Owned by exactly one node.
pub struct PipeReceiver {
    rx: mpsc::Receiver<Tuple>,
}

impl PipeReceiver {
    /// Yields tuples in enqueue order; `None` once the sender has closed.
    pub async fn recv(&mut self) -> Option<Tuple> {
        self.rx.recv().await
    }
}

/// Sending half of a pipe. Stamps the pipe's input name onto every tuple
/// and blocks when the buffer is full, which is the engine's
/// backpressure.
pub struct PipeSender {
    input_name: String,
    tx: Mutex<Option<mpsc::Sender<Tuple>>>,
}

impl PipeSender {
    pub fn input_name(&self) -> &str {
        &self.input_name
    }
}

#[async_trait]
impl Writer for PipeSender {
    async fn write(&self, _ctx: &Context, mut tuple: Tuple) -> Result<(), FlowError> {
        let tx = self.tx.lock().await.clone();
        match tx {
            Some(tx) => {
                tuple.input_name = self.input_name.clone();
                tx.send(tuple).await.map_err(|_| {
                    FlowError::fatal(anyhow::anyhow!(
                        "pipe '{}': receiver dropped",
                        self.input_name
                    ))
                })
            }
            None => Err(FlowError::fatal(anyhow::anyhow!(
                "pipe '{}': write after close",
                self.input_name
            ))),
        }
    }

    async fn close(&self, _ctx: &Context) -> Result<(), FlowError> {
        // dropping the sender ends the stream on the receiver side
        self.tx.lock().await.take();
        Ok(())
    }
}

/// Creates a pipe pair labeled with `input_name`.
pub fn pipe(input_name: impl Into<String>, capacity: usize) -> (PipeSender, PipeReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        PipeSender {
            input_name: input_name.into(),
            tx: Mutex::new(Some(tx)),
        },
        PipeReceiver { rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use boreas_core::Map;

    #[test]
    fn test_input_name() {
        let (tx, _rx) = pipe("upstream", 4);
        assert_eq!(tx.input_name(), "upstream");
    }

    #[tokio::test]
    async fn test_fifo_and_stamping() {
        let ctx = Context::default();
        let (tx, mut rx) = pipe("upstream", 8);

        for i in 0..5i64 {
            let t = Tuple::new(Map::new()).with_field("i", i);
            tx.write(&ctx, t).await.unwrap();
        }
        tx.close(&ctx).await.unwrap();

        for i in 0..5i64 {
            let t = rx.recv().await.unwrap();
            assert_eq!(t.get("i").unwrap().as_int().unwrap(), i);
            assert_eq!(t.input_name, "upstream");
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let ctx = Context::default();
        let (tx, mut rx) = pipe("upstream", 1);
        tx.close(&ctx).await.unwrap();

        let err = tx.write(&ctx, Tuple::new(Map::new())).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_buffer_blocks_until_drained() {
        let ctx = Context::default();
        let (tx, mut rx) = pipe("upstream", 1);
        tx.write(&ctx, Tuple::new(Map::new())).await.unwrap();

        // the second write must block until the reader makes room
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            tx.write(&ctx, Tuple::new(Map::new())),
        )
        .await;
        assert!(blocked.is_err());

        rx.recv().await.unwrap();
        tx.write(&ctx, Tuple::new(Map::new())).await.unwrap();
    }
}
