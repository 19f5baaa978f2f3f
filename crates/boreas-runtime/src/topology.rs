//! The static topology: lifecycle state machine, workers, and
//! fatal-error dispatch

use crate::context::Context;
use crate::error::{FlowError, TopologyError};
use crate::node::Node;
use crate::operator::{Processor, Source, Writer};
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error};

/// Lifecycle state of a topology. States are totally ordered and only
/// ever advance; the two shortcuts are `Initialized -> Stopped` and
/// `Starting -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TopologyState {
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for TopologyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TopologyState::Initialized => "initialized",
            TopologyState::Starting => "starting",
            TopologyState::Running => "running",
            TopologyState::Stopping => "stopping",
            TopologyState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

type FatalListener = Box<dyn Fn(&Context, &str, &FlowError) + Send + Sync>;

struct Inner {
    sources: HashMap<String, Arc<dyn Source>>,
    /// Kept for init/terminate bookkeeping during startup.
    processors: HashMap<String, Arc<dyn Processor>>,
    /// Taken by `run`; the state machine guarantees a single taker.
    nodes: Mutex<HashMap<String, Node>>,
    /// Destination writer of each source. An entry is removed exactly
    /// when its close is attempted, so close is called at most once per
    /// destination even when `stop` and the source worker race.
    src_dsts: Mutex<HashMap<String, Arc<dyn Writer>>>,
    state_tx: watch::Sender<TopologyState>,
    fatal_listeners: Mutex<Vec<FatalListener>>,
}

/// A fixed graph of sources, processors, and sinks connected by pipes.
/// Cheap to clone; all clones drive the same topology.
#[derive(Clone)]
pub struct StaticTopology {
    inner: Arc<Inner>,
}

impl StaticTopology {
    pub(crate) fn new(
        sources: HashMap<String, Arc<dyn Source>>,
        processors: HashMap<String, Arc<dyn Processor>>,
        nodes: HashMap<String, Node>,
        src_dsts: HashMap<String, Arc<dyn Writer>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(TopologyState::Initialized);
        Self {
            inner: Arc::new(Inner {
                sources,
                processors,
                nodes: Mutex::new(nodes),
                src_dsts: Mutex::new(src_dsts),
                state_tx,
                fatal_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Snapshot of the current lifecycle state.
    pub fn state(&self) -> TopologyState {
        *self.inner.state_tx.borrow()
    }

    /// Blocks until the state is at least `s` and returns the state
    /// observed. The returned state can be a successor of `s`.
    pub async fn wait(&self, s: TopologyState) -> TopologyState {
        let mut rx = self.inner.state_tx.subscribe();
        let result = match rx.wait_for(|st| *st >= s).await {
            Ok(st) => *st,
            // the sender lives inside `inner`, so this arm is
            // unreachable while `self` exists
            Err(_) => self.state(),
        };
        result
    }

    fn set_state(&self, s: TopologyState) {
        self.inner.state_tx.send_modify(|st| *st = s);
    }

    /// Starts every source and node worker and blocks until all of them
    /// have returned, then leaves the topology in `Stopped`.
    ///
    /// Only one caller can win the start; a concurrent second `run`
    /// waits until the topology is at least running and then fails with
    /// [`TopologyError::AlreadyStarted`].
    pub async fn run(&self, ctx: &Context) -> Result<(), TopologyError> {
        let mut started = false;
        self.inner.state_tx.send_if_modified(|st| {
            if *st == TopologyState::Initialized {
                *st = TopologyState::Starting;
                started = true;
                true
            } else {
                false
            }
        });
        if !started {
            if self.state() == TopologyState::Starting {
                // failing right away would be confusing for callers
                // racing the winner, so wait until the topology is at
                // least running before reporting the double start
                self.wait(TopologyState::Running).await;
            }
            return Err(TopologyError::AlreadyStarted);
        }

        if let Err(err) = self.init_processors(ctx).await {
            self.set_state(TopologyState::Stopped);
            return Err(err);
        }

        self.run_workers(ctx).await;
        self.set_state(TopologyState::Stopped);
        Ok(())
    }

    /// Initializes every processor. When one fails, all processors
    /// initialized so far are terminated again and the error is
    /// returned.
    async fn init_processors(&self, ctx: &Context) -> Result<(), TopologyError> {
        let mut inited: Vec<(&str, &Arc<dyn Processor>)> = Vec::new();
        for (name, processor) in &self.inner.processors {
            match processor.init(ctx).await {
                Ok(()) => inited.push((name.as_str(), processor)),
                Err(err) => {
                    for (n, p) in inited {
                        match AssertUnwindSafe(p.terminate(ctx)).catch_unwind().await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                error!(processor = %n, error = %err, "termination failed");
                            }
                            Err(payload) => {
                                let err = FlowError::from_panic(payload);
                                error!(processor = %n, error = %err, "termination panicked");
                            }
                        }
                    }
                    return Err(TopologyError::Init {
                        name: name.clone(),
                        source: err,
                    });
                }
            }
        }
        Ok(())
    }

    /// Spawns one worker per node and per source, marks the topology
    /// running, and joins all workers.
    async fn run_workers(&self, ctx: &Context) {
        let mut handles = Vec::new();

        let nodes = mem::take(&mut *self.inner.nodes.lock().unwrap());
        for (name, node) in nodes {
            let ctx = ctx.clone();
            let topology = self.clone();
            handles.push(tokio::spawn(node.run(ctx, topology, name)));
        }

        for (name, source) in &self.inner.sources {
            let dst = match self.inner.src_dsts.lock().unwrap().get(name) {
                Some(dst) => dst.clone(),
                None => continue,
            };
            let name = name.clone();
            let source = source.clone();
            let ctx = ctx.clone();
            let topology = self.clone();
            handles.push(tokio::spawn(async move {
                match AssertUnwindSafe(source.generate_stream(&ctx, dst.as_ref()))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) if err.is_stop_signal() => {
                        debug!(source = %name, "source stopped");
                    }
                    Ok(Err(err)) => {
                        error!(source = %name, error = %err, "source cannot generate tuples");
                    }
                    Err(payload) => {
                        let err = FlowError::from_panic(payload);
                        error!(source = %name, error = %err, "source panicked");
                    }
                }
                // the destination may already have been closed by `stop`
                // when the source failed to stop; close_destination
                // keeps this race single-shot
                if let Err(err) = topology.close_destination(&ctx, &name).await {
                    error!(source = %name, error = %err, "cannot close the source destination");
                }
            }));
        }

        self.set_state(TopologyState::Running);
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn close_destination(&self, ctx: &Context, source: &str) -> Result<(), FlowError> {
        let dst = self.inner.src_dsts.lock().unwrap().remove(source);
        match dst {
            Some(dst) => dst.close(ctx).await,
            None => Ok(()),
        }
    }

    /// Requests a graceful shutdown. Idempotent and safe to call from
    /// any state; returns once the topology is stopped.
    ///
    /// Sources are asked to stop; once they return, their destinations
    /// close and end-of-stream propagates through the graph until `run`
    /// observes every worker gone. A source that refuses to stop is
    /// reported by name, its destination force-closed, and the lifecycle
    /// forced to `Stopped` so shutdown never hangs.
    pub async fn stop(&self, ctx: &Context) -> Result<(), TopologyError> {
        loop {
            match self.state() {
                TopologyState::Initialized => {
                    // shutdown before start
                    let stopped = self.inner.state_tx.send_if_modified(|st| {
                        if *st == TopologyState::Initialized {
                            *st = TopologyState::Stopped;
                            true
                        } else {
                            false
                        }
                    });
                    if stopped {
                        return Ok(());
                    }
                    // lost a race with run; re-evaluate
                }
                TopologyState::Starting => {
                    self.wait(TopologyState::Running).await;
                    // somebody may have stopped the topology meanwhile,
                    // so re-evaluate instead of assuming Running
                }
                TopologyState::Running => {
                    let stopping = self.inner.state_tx.send_if_modified(|st| {
                        if *st == TopologyState::Running {
                            *st = TopologyState::Stopping;
                            true
                        } else {
                            false
                        }
                    });
                    if stopping {
                        break;
                    }
                }
                TopologyState::Stopping => {
                    // someone else is stopping; wait for them
                    self.wait(TopologyState::Stopped).await;
                    return Ok(());
                }
                TopologyState::Stopped => return Ok(()),
            }
        }

        let sources: Vec<(String, Arc<dyn Source>)> = self
            .inner
            .sources
            .iter()
            .map(|(n, s)| (n.clone(), s.clone()))
            .collect();

        let mut failures: Vec<String> = Vec::new();
        for (name, source) in sources {
            let failed = match AssertUnwindSafe(source.stop(ctx)).catch_unwind().await {
                Ok(Ok(())) => false,
                Ok(Err(err)) => {
                    error!(source = %name, error = %err, "cannot stop source");
                    true
                }
                Err(payload) => {
                    let err = FlowError::from_panic(payload);
                    error!(source = %name, error = %err, "cannot stop source");
                    true
                }
            };
            if failed {
                // this source will never close its own destination
                if let Err(err) = self.close_destination(ctx, &name).await {
                    error!(source = %name, error = %err, "cannot close the failed source's destination");
                }
                failures.push(name);
            }
        }

        if failures.is_empty() {
            self.wait(TopologyState::Stopped).await;
            Ok(())
        } else {
            // waiting for Stopped could block forever with a wedged
            // source, so force the final state even though run may still
            // be joining workers
            self.set_state(TopologyState::Stopped);
            Err(TopologyError::SourcesNotStopped {
                count: failures.len(),
                names: failures,
            })
        }
    }

    /// Registers a callback invoked whenever a node reports a fatal
    /// error. Listeners are serialized under a lock: two simultaneous
    /// fatals never run listeners concurrently, so listeners need no
    /// locking of their own.
    pub fn add_fatal_listener<F>(&self, listener: F)
    where
        F: Fn(&Context, &str, &FlowError) + Send + Sync + 'static,
    {
        self.inner
            .fatal_listeners
            .lock()
            .unwrap()
            .push(Box::new(listener));
    }

    pub(crate) fn notify_fatal(&self, ctx: &Context, name: &str, err: &FlowError) {
        let listeners = self.inner.fatal_listeners.lock().unwrap();
        for listener in listeners.iter() {
            listener(ctx, name, err);
        }
    }
}
