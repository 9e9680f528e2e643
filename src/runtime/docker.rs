use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, error, info, warn};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::Reconciler;
use crate::error::{Error, Result};
use crate::labels::extract_hosts;
use crate::store::RecordWriter;
use crate::types::{Host, Source};

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A running container and its labels.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Container,
    Other,
}

/// The parts of a Docker event the reconciler looks at.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub kind: EventKind,
    pub action: String,
    pub id: String,
}

impl ContainerEvent {
    pub fn is_container_start(&self) -> bool {
        self.kind == EventKind::Container && self.action == "start"
    }
}

impl From<EventMessage> for ContainerEvent {
    fn from(event: EventMessage) -> Self {
        let kind = match event.typ {
            Some(EventMessageTypeEnum::CONTAINER) => EventKind::Container,
            _ => EventKind::Other,
        };
        Self {
            kind,
            action: event.action.unwrap_or_default(),
            id: event.actor.and_then(|a| a.id).unwrap_or_default(),
        }
    }
}

/// The container platform as seen by the reconciler.
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    async fn running_containers(&self) -> Result<Vec<ContainerInfo>>;

    /// Fresh read of a container's labels.
    async fn inspect(&self, id: &str) -> Result<ContainerInfo>;

    /// Live lifecycle events. The stream ends or yields an error when the
    /// connection is lost.
    fn events(&self) -> BoxStream<'_, Result<ContainerEvent>>;
}

pub struct BollardPlatform {
    docker: Docker,
}

impl BollardPlatform {
    pub fn connect() -> Result<Self> {
        // Unix socket on Linux, DOCKER_HOST when set.
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerPlatform for BollardPlatform {
    async fn running_containers(&self) -> Result<Vec<ContainerInfo>> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = timeout(LIST_TIMEOUT, self.docker.list_containers(Some(opts)))
            .await
            .map_err(|_| Error::Timeout("docker container list"))??;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .unwrap_or_default()
                    .iter()
                    .map(|n| n.trim_start_matches('/'))
                    .collect::<Vec<_>>()
                    .join(","),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        let detail = timeout(
            INSPECT_TIMEOUT,
            self.docker
                .inspect_container(id, None::<InspectContainerOptions>),
        )
        .await
        .map_err(|_| Error::Timeout("docker container inspect"))??;

        Ok(ContainerInfo {
            id: detail.id.unwrap_or_else(|| id.to_string()),
            name: detail
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            labels: detail.config.and_then(|c| c.labels).unwrap_or_default(),
        })
    }

    fn events(&self) -> BoxStream<'_, Result<ContainerEvent>> {
        let opts = EventsOptions::<String> {
            filters: [("type", ["container"]), ("event", ["start"])]
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect(),
            ..Default::default()
        };
        self.docker
            .events(Some(opts))
            .map(|msg| msg.map(ContainerEvent::from).map_err(Error::from))
            .boxed()
    }
}

/// Publishes a record for every Traefik host on running containers, then
/// follows container start events.
pub struct DockerReconciler<P> {
    platform: P,
    writer: RecordWriter,
    target: String,
}

impl<P: ContainerPlatform> DockerReconciler<P> {
    pub fn new(platform: P, writer: RecordWriter, target: impl Into<String>) -> Self {
        Self {
            platform,
            writer,
            target: target.into(),
        }
    }

    /// Writes records for every currently running container.
    /// Returns the number of records written.
    pub async fn sync(&self) -> Result<usize> {
        let containers = self.platform.running_containers().await?;
        info!("Syncing {} existing containers", containers.len());

        let mut written = 0;
        for container in &containers {
            let hosts = extract_hosts(&container.labels);
            if hosts.is_empty() {
                continue;
            }
            debug!(
                "Found hosts in labels of {} ({}): {:?}",
                container.name, container.id, hosts
            );
            written += self.publish(hosts).await;
        }
        Ok(written)
    }

    /// Handles one event. Only container starts are acted on; the labels
    /// are read fresh from the platform rather than from the event.
    pub async fn handle_event(&self, event: &ContainerEvent) -> usize {
        if !event.is_container_start() {
            return 0;
        }

        let container = match self.platform.inspect(&event.id).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to inspect started container {}: {}", event.id, e);
                return 0;
            }
        };

        let hosts = extract_hosts(&container.labels);
        if hosts.is_empty() {
            return 0;
        }
        info!(
            "Container started: {} ({}) hosts={:?}",
            container.name, container.id, hosts
        );
        self.publish(hosts).await
    }

    async fn publish(&self, hosts: Vec<String>) -> usize {
        let mut written = 0;
        for name in hosts {
            let host = Host::new(name, Source::Docker);
            match self.writer.write_alias(&host, &self.target).await {
                Ok(()) => written += 1,
                Err(e) => error!("Failed to create DNS record for {}: {}", host.name, e),
            }
        }
        written
    }
}

#[async_trait]
impl<P: ContainerPlatform + 'static> Reconciler for DockerReconciler<P> {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Starting Docker event monitoring (target {})", self.target);

        if let Err(e) = self.sync().await {
            warn!("Failed to sync existing containers: {}", e);
        }

        let mut stream = self.platform.events();
        info!("Listening for Docker events...");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Docker event monitoring cancelled");
                    return Ok(());
                }
                msg = stream.next() => match msg {
                    Some(Ok(event)) => {
                        debug!("Docker event: {:?} {} {}", event.kind, event.action, event.id);
                        self.handle_event(&event).await;
                    }
                    Some(Err(e)) => {
                        error!("Docker events stream error: {}", e);
                        return Err(e);
                    }
                    None => {
                        error!("Docker events stream ended");
                        return Err(Error::EventStreamClosed);
                    }
                },
            }
        }
    }
}
