//! Serialized access to a coordinator from many tasks.
//!
//! [`SharedCluster`] puts one exclusive lock around every entry point.
//! [`InputPump`] feeds transport input through a bounded queue drained by a
//! single task, so handlers for one cluster never run concurrently.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterCoordinator, ClusterSummary, MembershipChange};
use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::gateway::GatewayNode;
use crate::notification::{ClusterStateSnapshot, DecodedNotification};
use crate::router::{ClusterInput, DispatchOutcome};
use crate::transport::GatewayTransport;

/// A coordinator behind a per-cluster exclusive lock
pub struct SharedCluster<T>
where
    T: GatewayTransport,
{
    inner: Arc<Mutex<ClusterCoordinator<T>>>,
}

impl<T> Clone for SharedCluster<T>
where
    T: GatewayTransport,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> SharedCluster<T>
where
    T: GatewayTransport,
{
    /// Wrap a coordinator
    pub fn new(coordinator: ClusterCoordinator<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(coordinator)),
        }
    }

    /// Lock the coordinator. Do not hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, ClusterCoordinator<T>> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access to the coordinator
    pub fn with<R>(&self, f: impl FnOnce(&mut ClusterCoordinator<T>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// See [`ClusterCoordinator::dispatch`]
    pub fn dispatch(&self, notification: &DecodedNotification) -> DispatchOutcome {
        self.inner.lock().dispatch(notification)
    }

    /// See [`ClusterCoordinator::apply`]
    pub fn apply(&self, input: ClusterInput) -> DispatchOutcome {
        self.inner.lock().apply(input)
    }

    /// See [`ClusterCoordinator::reconcile_membership`]
    pub fn reconcile_membership(
        &self,
        snapshot: &ClusterStateSnapshot,
        observed_at: DateTime<Utc>,
    ) -> MembershipChange {
        self.inner
            .lock()
            .reconcile_membership(snapshot, observed_at)
    }

    /// See [`ClusterCoordinator::logout_all`]
    pub fn logout_all(&self) -> usize {
        self.inner.lock().logout_all()
    }

    /// Aggregate counts across the cluster
    pub fn summary(&self) -> ClusterSummary {
        self.inner.lock().summary()
    }

    /// Copy of the configuration in use
    pub fn config(&self) -> ClusterConfig {
        self.inner.lock().config().clone()
    }

    /// Copies of every gateway in display order
    pub fn sorted_nodes(&self) -> Vec<GatewayNode> {
        self.inner
            .lock()
            .sorted_nodes()
            .into_iter()
            .cloned()
            .collect()
    }
}

/// Single-consumer queue that applies transport input to a shared cluster
pub struct InputPump<T>
where
    T: GatewayTransport,
{
    cluster: SharedCluster<T>,
    sender: mpsc::Sender<ClusterInput>,
    receiver: Option<mpsc::Receiver<ClusterInput>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl<T> InputPump<T>
where
    T: GatewayTransport,
{
    /// Create a pump sized from the cluster's configuration.
    ///
    /// Input submitted before [`Self::start`] waits in the queue.
    pub fn new(cluster: SharedCluster<T>) -> Self {
        let config = cluster.config();
        let (sender, receiver) = mpsc::channel(config.input_queue_capacity.max(1));

        Self {
            cluster,
            sender,
            receiver: Some(receiver),
            shutdown_tx: None,
            handle: None,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// A sender for transport tasks
    pub fn sender(&self) -> mpsc::Sender<ClusterInput> {
        self.sender.clone()
    }

    /// Queue one input, waiting for room if the queue is full
    ///
    /// # Errors
    ///
    /// Returns [`Error::PumpClosed`] once the pump has shut down.
    pub async fn submit(&self, input: ClusterInput) -> Result<()> {
        self.sender
            .send(input)
            .await
            .map_err(|_| Error::PumpClosed)
    }

    /// Spawn the consumer task
    ///
    /// # Errors
    ///
    /// Returns [`Error::PumpAlreadyStarted`] if the pump was started before.
    pub fn start(&mut self) -> Result<()> {
        let receiver = self.receiver.take().ok_or(Error::PumpAlreadyStarted)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let cluster = self.cluster.clone();

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(tokio::spawn(run_pump(cluster, receiver, shutdown_rx)));

        info!("Input pump started");
        Ok(())
    }

    /// Stop the consumer after it applies what is already queued.
    ///
    /// A pump that was never started applies its queue here instead. A task
    /// still running after the shutdown timeout is aborted.
    pub async fn shutdown(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            drain(&self.cluster, &mut receiver);
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let Some(mut handle) = self.handle.take() else {
            debug!("Input pump was not running");
            return;
        };

        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => info!("Input pump stopped"),
            Ok(Err(e)) => error!("Input pump task failed: {}", e),
            Err(_) => {
                warn!(
                    "Input pump did not stop within {:?}, aborting",
                    self.shutdown_timeout
                );
                handle.abort();
            }
        }
    }

    /// Whether the consumer task is running
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

async fn run_pump<T>(
    cluster: SharedCluster<T>,
    mut receiver: mpsc::Receiver<ClusterInput>,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    T: GatewayTransport,
{
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                drain(&cluster, &mut receiver);
                break;
            }

            input = receiver.recv() => {
                let Some(input) = input else {
                    debug!("All input senders dropped");
                    break;
                };
                cluster.apply(input);
            }
        }
    }
}

fn drain<T>(cluster: &SharedCluster<T>, receiver: &mut mpsc::Receiver<ClusterInput>)
where
    T: GatewayTransport,
{
    receiver.close();
    let mut drained = 0usize;
    while let Ok(input) = receiver.try_recv() {
        cluster.apply(input);
        drained += 1;
    }
    debug!("Input pump drained {} queued inputs", drained);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::InstanceKey;
    use crate::transport::DetachedTransport;
    use assert_matches::assert_matches;

    fn shared() -> SharedCluster<DetachedTransport> {
        SharedCluster::new(ClusterCoordinator::new(Arc::new(DetachedTransport)))
    }

    fn membership(keys: &[&str]) -> ClusterInput {
        ClusterInput::Membership {
            snapshot: ClusterStateSnapshot::from_members(keys.iter().map(|key| (*key, None))),
            observed_at: DateTime::from_timestamp(10, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_shutdown_applies_queued_input() {
        let cluster = shared();
        let mut pump = InputPump::new(cluster.clone());

        pump.submit(membership(&["a"])).await.unwrap();
        pump.submit(membership(&["a", "b"])).await.unwrap();
        pump.start().unwrap();
        pump.shutdown().await;

        assert_eq!(cluster.summary().live_nodes, 2);
        assert!(!pump.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_without_start_applies_queued_input() {
        let cluster = shared();
        let mut pump = InputPump::new(cluster.clone());

        pump.submit(membership(&["a", "b", "c"])).await.unwrap();
        pump.shutdown().await;

        assert_eq!(cluster.summary().live_nodes, 3);
        assert_matches!(pump.start(), Err(Error::PumpAlreadyStarted));
        assert_matches!(
            pump.submit(membership(&["a"])).await,
            Err(Error::PumpClosed)
        );
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let mut pump = InputPump::new(shared());
        pump.start().unwrap();
        pump.shutdown().await;

        assert_matches!(
            pump.submit(membership(&["a"])).await,
            Err(Error::PumpClosed)
        );
    }

    #[tokio::test]
    async fn test_start_twice() {
        let mut pump = InputPump::new(shared());
        pump.start().unwrap();

        assert_matches!(pump.start(), Err(Error::PumpAlreadyStarted));

        pump.shutdown().await;
    }

    #[test]
    fn test_with_gives_exclusive_access() {
        let cluster = shared();

        let joined = cluster.with(|c| c.process_join(&InstanceKey::from("a")));

        assert!(joined);
        assert_eq!(cluster.sorted_nodes().len(), 1);
    }
}
