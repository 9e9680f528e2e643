//! Runs one or both reconcilers according to the agent mode.

use std::sync::Arc;

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::runtime::Reconciler;

pub enum Orchestrator {
    /// A single reconciler; its result is the process result.
    Single(Arc<dyn Reconciler>),
    /// Both reconcilers side by side until cancellation.
    Hybrid {
        docker: Arc<dyn Reconciler>,
        proxmox: Arc<dyn Reconciler>,
    },
}

impl Orchestrator {
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        match self {
            Orchestrator::Single(reconciler) => {
                info!("Running {} reconciler", reconciler.name());
                reconciler.run(cancel).await
            }
            Orchestrator::Hybrid { docker, proxmox } => {
                info!("Running docker and proxmox reconcilers in hybrid mode");
                let handles = [docker, proxmox].map(|r| spawn_reconciler(r, cancel.clone()));

                // An early exit of one side leaves the other running.
                cancel.cancelled().await;
                info!("Shutdown requested, waiting for reconcilers to stop");

                for handle in handles {
                    if let Err(e) = handle.await {
                        error!("Reconciler task panicked: {}", e);
                    }
                }
                Ok(())
            }
        }
    }
}

fn spawn_reconciler(
    reconciler: Arc<dyn Reconciler>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let name = reconciler.name();
        match reconciler.run(cancel.clone()).await {
            Ok(()) if cancel.is_cancelled() => info!("{} reconciler stopped", name),
            Ok(()) => warn!("{} reconciler exited early", name),
            Err(e) => error!("{} reconciler failed: {}", name, e),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::Error;

    struct Failing;

    #[async_trait]
    impl Reconciler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self, _cancel: CancellationToken) -> Result<()> {
            Err(Error::EventStreamClosed)
        }
    }

    #[derive(Default)]
    struct UntilCancelled {
        stopped: AtomicBool,
    }

    #[async_trait]
    impl Reconciler for UntilCancelled {
        fn name(&self) -> &'static str {
            "patient"
        }

        async fn run(&self, cancel: CancellationToken) -> Result<()> {
            cancel.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_mode_returns_reconciler_error() {
        let result = Orchestrator::Single(Arc::new(Failing))
            .run(CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::EventStreamClosed)));
    }

    #[tokio::test]
    async fn hybrid_keeps_running_after_one_side_fails() {
        let patient = Arc::new(UntilCancelled::default());
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::Hybrid {
            docker: Arc::new(Failing),
            proxmox: patient.clone(),
        };

        let task = tokio::spawn(orchestrator.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        assert!(!patient.stopped.load(Ordering::SeqCst));

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(patient.stopped.load(Ordering::SeqCst));
    }
}
