use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub mod docker;
pub mod proxmox;

pub use docker::{BollardPlatform, DockerReconciler};
pub use proxmox::{ProxmoxClient, ProxmoxReconciler};

#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Keeps discovered hosts converged on their records until `cancel`
    /// fires. Returns `Ok(())` on cancellation.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}
