//! Record store boundary and the writer that lays records out in it.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};

use crate::dns::KeyPathBuilder;
use crate::error::Result;
use crate::types::{AddressFamily, DnsRecord, Host, RecordType, ResolvedAddress};

pub mod etcd;
pub use etcd::EtcdStore;

/// Something that can upsert a value at a key.
///
/// Implementations must bound each call in time and must be safe to call
/// from several tasks at once.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Encodes records and writes them under reverse-domain keys.
#[derive(Clone)]
pub struct RecordWriter {
    store: Arc<dyn RecordStore>,
    keys: KeyPathBuilder,
}

impl RecordWriter {
    pub fn new(store: Arc<dyn RecordStore>, keys: KeyPathBuilder) -> Self {
        Self { store, keys }
    }

    /// Writes a single record for `host` pointing at `target`, which may be
    /// an IP literal or a hostname.
    pub async fn write_alias(&self, host: &Host, target: &str) -> Result<()> {
        let key = self.keys.path(&host.name);
        let record_type = RecordType::for_target(target);
        info!(
            "Creating {} record: {} -> {} (source={})",
            record_type, host.name, target, host.source
        );
        let value = serde_json::to_string(&DnsRecord::new(target))?;
        self.store.put(&key, &value).await
    }

    /// Writes one record per address under `a<N>` / `aaaa<N>` child keys.
    /// Returns the number of records written.
    pub async fn write_addresses(&self, host: &Host, addresses: &[ResolvedAddress]) -> Result<usize> {
        let mut v4 = 0;
        let mut v6 = 0;
        let mut created = Vec::with_capacity(addresses.len());

        for addr in addresses {
            let index = match addr.family() {
                AddressFamily::V4 => {
                    v4 += 1;
                    v4
                }
                AddressFamily::V6 => {
                    v6 += 1;
                    v6
                }
            };
            let key = self.keys.indexed_path(&host.name, addr.family(), index);
            let value = serde_json::to_string(&DnsRecord::new(addr.to_string()))?;
            if let Err(e) = self.store.put(&key, &value).await {
                error!(
                    "Failed to create {} record for {} ({}): {}",
                    addr.record_type(),
                    host.name,
                    addr,
                    e
                );
                return Err(e);
            }
            info!("Created {} record: {} -> {}", addr.record_type(), host.name, addr);
            created.push(format!("{}->{}", addr.record_type(), addr));
        }

        if !created.is_empty() {
            info!(
                "DNS records for {} ({}): {}",
                host.name,
                created.len(),
                created.join(", ")
            );
        }
        Ok(created.len())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;

    /// In-memory store that records every put.
    #[derive(Default)]
    pub struct MemoryStore {
        pub entries: Mutex<BTreeMap<String, String>>,
        pub puts: Mutex<Vec<String>>,
        pub fail_on: Mutex<Option<String>>,
    }

    impl MemoryStore {
        pub fn snapshot(&self) -> BTreeMap<String, String> {
            self.entries.lock().unwrap().clone()
        }

        pub fn put_count(&self) -> usize {
            self.puts.lock().unwrap().len()
        }

        pub fn fail_on(&self, key: &str) {
            *self.fail_on.lock().unwrap() = Some(key.to_string());
        }
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn put(&self, key: &str, value: &str) -> Result<()> {
            if self.fail_on.lock().unwrap().as_deref() == Some(key) {
                return Err(Error::Timeout("etcd put"));
            }
            self.puts.lock().unwrap().push(key.to_string());
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    pub fn writer(store: &Arc<MemoryStore>) -> RecordWriter {
        RecordWriter::new(store.clone(), KeyPathBuilder::new("/skydns"))
    }
}
