//! Listener containers: worker tasks that feed a channel into a listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::{Delivery, MessageSource, TransportError};

/// Receives deliveries from a listener container.
///
/// The listener owns acknowledgment: a delivery dropped without `ack()` stays
/// pending until the container recovers it.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, delivery: Delivery);
}

/// Lifecycle hooks for an inbound channel consumer.
#[async_trait]
pub trait ListenerContainer: Send + Sync {
    /// Begin consuming. Fails once the container has been shut down.
    async fn start(&self) -> Result<(), TransportError>;

    /// Stop consuming after in-flight messages finish. Unacknowledged
    /// deliveries go back to the queue.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Stop permanently.
    async fn shutdown(&self) -> Result<(), TransportError>;

    fn is_running(&self) -> bool;
}

#[derive(Default)]
struct Workers {
    shutdown_tx: Option<broadcast::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

/// Runs `concurrency` worker tasks, each taking one delivery at a time from
/// the source and awaiting the listener before taking the next.
pub struct QueueListenerContainer {
    name: String,
    source: Arc<dyn MessageSource>,
    listener: Arc<dyn MessageListener>,
    concurrency: usize,
    running: Arc<AtomicBool>,
    terminated: AtomicBool,
    workers: Mutex<Workers>,
}

impl QueueListenerContainer {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn MessageSource>,
        listener: Arc<dyn MessageListener>,
        concurrency: usize,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            listener,
            concurrency: concurrency.max(1),
            running: Arc::new(AtomicBool::new(false)),
            terminated: AtomicBool::new(false),
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn spawn_worker(&self, index: usize, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let listener = Arc::clone(&self.listener);
        let running = Arc::clone(&self.running);
        let name = self.name.clone();

        tokio::spawn(async move {
            debug!("{} worker {} started", name, index);
            loop {
                let delivery = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    delivery = source.receive() => delivery,
                };

                match delivery {
                    Some(delivery) => listener.on_message(delivery).await,
                    None => {
                        info!("{} source closed, worker {} exiting", name, index);
                        break;
                    }
                }

                if !running.load(Ordering::Relaxed) {
                    break;
                }
            }
            debug!("{} worker {} stopped", name, index);
        })
    }

    async fn halt(&self) {
        let handles = {
            let mut workers = self.workers.lock().await;
            if let Some(tx) = workers.shutdown_tx.take() {
                let _ = tx.send(());
            }
            std::mem::take(&mut workers.handles)
        };

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("{} worker ended abnormally: {}", self.name, e);
            }
        }

        self.source.recover();
    }
}

#[async_trait]
impl ListenerContainer for QueueListenerContainer {
    async fn start(&self) -> Result<(), TransportError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(TransportError::Container(format!(
                "{} has been shut down",
                self.name
            )));
        }

        let mut workers = self.workers.lock().await;
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("{} already running", self.name);
            return Ok(());
        }

        self.source.recover();

        let (shutdown_tx, _) = broadcast::channel(1);
        workers.handles = (0..self.concurrency)
            .map(|index| self.spawn_worker(index, shutdown_tx.subscribe()))
            .collect();
        workers.shutdown_tx = Some(shutdown_tx);

        info!("Started {} with {} workers", self.name, self.concurrency);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("{} not running", self.name);
            return Ok(());
        }

        info!("Stopping {}", self.name);
        self.halt().await;
        info!("Stopped {}", self.name);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.terminated.store(true, Ordering::SeqCst);
        self.stop().await?;
        info!("{} shut down", self.name);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::memory::MemoryQueue;
    use crate::messaging::transport::MessageSender;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Acks everything except payloads starting with "hold".
    #[derive(Default)]
    struct CollectingListener {
        seen: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageListener for CollectingListener {
        async fn on_message(&self, delivery: Delivery) {
            self.seen.lock().unwrap().push(delivery.payload().to_string());
            if !delivery.payload().starts_with("hold") {
                delivery.ack().unwrap();
            }
        }
    }

    async fn wait_for(listener: &CollectingListener, count: usize) {
        for _ in 0..100 {
            if listener.seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("listener saw fewer than {} messages", count);
    }

    #[tokio::test]
    async fn test_consumes_until_stopped() {
        let queue = MemoryQueue::new("ops");
        let listener = Arc::new(CollectingListener::default());
        let container = QueueListenerContainer::new(
            "operation-listener",
            Arc::new(queue.clone()),
            listener.clone(),
            2,
        );

        container.start().await.unwrap();
        assert!(container.is_running());

        queue.send("a".to_string(), None).await.unwrap();
        queue.send("b".to_string(), None).await.unwrap();
        wait_for(&listener, 2).await;

        container.stop().await.unwrap();
        assert!(!container.is_running());

        queue.send("c".to_string(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(listener.seen.lock().unwrap().len(), 2);
        assert_eq!(queue.ready_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_returns_unacked_for_redelivery() {
        let queue = MemoryQueue::new("jobs");
        let listener = Arc::new(CollectingListener::default());
        let container =
            QueueListenerContainer::new("job-listener", Arc::new(queue.clone()), listener.clone(), 1);

        container.start().await.unwrap();
        queue.send("hold-1".to_string(), None).await.unwrap();
        wait_for(&listener, 1).await;

        container.stop().await.unwrap();
        assert_eq!(queue.unacked_count(), 0);
        assert_eq!(queue.ready_payloads(), vec!["hold-1"]);

        container.start().await.unwrap();
        wait_for(&listener, 2).await;
        container.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal() {
        let queue = MemoryQueue::new("ops");
        let listener = Arc::new(CollectingListener::default());
        let container =
            QueueListenerContainer::new("operation-listener", Arc::new(queue), listener, 1);

        container.start().await.unwrap();
        container.shutdown().await.unwrap();
        assert!(!container.is_running());
        assert!(matches!(
            container.start().await,
            Err(TransportError::Container(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let queue = MemoryQueue::new("ops");
        let listener = Arc::new(CollectingListener::default());
        let container =
            QueueListenerContainer::new("operation-listener", Arc::new(queue), listener, 1);
        container.stop().await.unwrap();
        assert!(!container.is_running());
    }
}
