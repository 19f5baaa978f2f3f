//! Broadcast of one tuple stream to several named destinations

use crate::context::Context;
use crate::error::{BulkErrors, FlowError};
use crate::operator::Writer;
use crate::tuple::Tuple;
use async_trait::async_trait;
use std::sync::Arc;

/// Forwards every tuple to a fixed, ordered list of named destinations.
/// With more than one destination each gets a deep copy so downstream
/// mutations stay independent. A fanout never retries; retry, if any, is
/// the receiving node's concern.
#[derive(Default)]
pub struct Fanout {
    names: Vec<String>,
    dsts: Vec<Arc<dyn Writer>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Not safe to call once the topology has started flowing tuples.
    pub fn add_destination(&mut self, name: impl Into<String>, dst: Arc<dyn Writer>) {
        self.names.push(name.into());
        self.dsts.push(dst);
    }

    pub fn len(&self) -> usize {
        self.dsts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dsts.is_empty()
    }
}

#[async_trait]
impl Writer for Fanout {
    async fn write(&self, ctx: &Context, tuple: Tuple) -> Result<(), FlowError> {
        let mut errs = BulkErrors::new();
        if self.dsts.len() == 1 {
            if let Err(err) = self.dsts[0].write(ctx, tuple).await {
                errs.push(err.context(format!("a tuple could not be written to {}", self.names[0])));
            }
        } else {
            for (name, dst) in self.names.iter().zip(&self.dsts) {
                if let Err(err) = dst.write(ctx, tuple.copy()).await {
                    errs.push(err.context(format!("a tuple could not be written to {name}")));
                }
            }
        }
        errs.into_result()
    }

    async fn close(&self, ctx: &Context) -> Result<(), FlowError> {
        let mut errs = BulkErrors::new();
        for (name, dst) in self.names.iter().zip(&self.dsts) {
            if let Err(err) = dst.close(ctx).await {
                errs.push(err.context(format!("output channel to {name} could not be closed")));
            }
        }
        errs.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipe;
    use boreas_core::{Map, Value};

    #[tokio::test]
    async fn test_single_destination_forwards() {
        let ctx = Context::default();
        let (tx, mut rx) = pipe("a", 4);
        let mut fanout = Fanout::new();
        fanout.add_destination("a", Arc::new(tx));

        fanout
            .write(&ctx, Tuple::new(Map::new()).with_field("x", 1i64))
            .await
            .unwrap();
        fanout.close(&ctx).await.unwrap();

        let t = rx.recv().await.unwrap();
        assert_eq!(t.get("x"), Some(&Value::Int(1)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_multiple_destinations_receive_copies() {
        let ctx = Context::default();
        let (tx_a, mut rx_a) = pipe("a", 4);
        let (tx_b, mut rx_b) = pipe("b", 4);
        let mut fanout = Fanout::new();
        fanout.add_destination("a", Arc::new(tx_a));
        fanout.add_destination("b", Arc::new(tx_b));
        assert_eq!(fanout.len(), 2);

        fanout
            .write(&ctx, Tuple::new(Map::new()).with_field("x", 1i64))
            .await
            .unwrap();

        let mut t_a = rx_a.recv().await.unwrap();
        let t_b = rx_b.recv().await.unwrap();
        assert_eq!(t_a.input_name, "a");
        assert_eq!(t_b.input_name, "b");

        // the copies are independent
        t_a.data.insert("x".to_string(), Value::Int(9));
        assert_eq!(t_b.get("x"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_close_aggregates_errors() {
        let ctx = Context::default();
        let (tx_a, _rx_a) = pipe("a", 4);
        let (tx_b, _rx_b) = pipe("b", 4);

        struct FailingWriter;
        #[async_trait]
        impl Writer for FailingWriter {
            async fn write(&self, _ctx: &Context, _t: Tuple) -> Result<(), FlowError> {
                Err(FlowError::new(anyhow::anyhow!("nope")))
            }
            async fn close(&self, _ctx: &Context) -> Result<(), FlowError> {
                Err(FlowError::new(anyhow::anyhow!("close failed")))
            }
        }

        let mut fanout = Fanout::new();
        fanout.add_destination("a", Arc::new(tx_a));
        fanout.add_destination("bad", Arc::new(FailingWriter));
        fanout.add_destination("b", Arc::new(tx_b));

        let err = fanout.close(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
