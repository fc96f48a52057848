//! Publication Pipeline: external interfaces and retry plumbing.
//!
//! Two externally owned steps, each independently retryable:
//! 1. upload the certificate payload to a content-addressed store;
//! 2. anchor the resulting address on an append-only ledger.
//!
//! The orchestration (locking, checkpointing each step on the unit) lives in
//! `Workbench::publish`; this module defines the seams and local implementations.

use crate::core::config::{LedgerConfig, PublicationConfig};
use crate::core::error::{PublicationError, UnitpassError};
use crate::core::time;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Content-addressed store. Must be deterministic: same bytes, same address.
pub trait ContentStore: Send + Sync {
    fn put(&self, payload: &[u8]) -> Result<String, PublicationError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnchorRequest {
    pub content_address: String,
    pub unit_uuid: String,
    pub internal_id: String,
    pub schema_id: String,
}

/// Append-only ledger. A returned reference is durable.
pub trait Ledger: Send + Sync {
    fn anchor(&self, request: &AnchorRequest) -> Result<String, PublicationError>;
}

pub fn sha256_address(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("sha256:{:x}", hasher.finalize())
}

pub fn gateway_link(prefix: &str, content_address: &str) -> String {
    format!("{}{}", prefix, content_address)
}

/// Filesystem content store: one file per address under `dir`.
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    dir: PathBuf,
}

impl LocalContentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, content_address: &str) -> PathBuf {
        let name = content_address.replace(':', "_");
        self.dir.join(format!("{}.json", name))
    }

    pub fn get(&self, content_address: &str) -> Result<Vec<u8>, PublicationError> {
        fs::read(self.path_for(content_address))
            .map_err(|e| PublicationError::ContentStore(e.to_string()))
    }
}

impl ContentStore for LocalContentStore {
    fn put(&self, payload: &[u8]) -> Result<String, PublicationError> {
        let address = sha256_address(payload);
        let path = self.path_for(&address);
        if path.exists() {
            return Ok(address);
        }
        fs::create_dir_all(&self.dir).map_err(|e| PublicationError::ContentStore(e.to_string()))?;
        // Write-then-rename so a reader never sees a partial object.
        let tmp = path.with_extension(format!("tmp.{}", time::new_event_id()));
        fs::write(&tmp, payload).map_err(|e| PublicationError::ContentStore(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| PublicationError::ContentStore(e.to_string()))?;
        Ok(address)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub reference: String,
    pub ts: String,
    pub network: String,
    pub request: AnchorRequest,
}

/// Ledger backed by an append-only JSON-lines file.
#[derive(Debug)]
pub struct JsonlLedger {
    path: PathBuf,
    network: String,
    append_lock: Mutex<()>,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>, network: &str) -> Self {
        Self {
            path: path.into(),
            network: network.to_string(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn from_config(root: &Path, config: &LedgerConfig) -> Self {
        let path = if config.path.is_absolute() {
            config.path.clone()
        } else {
            root.join(&config.path)
        };
        Self::new(path, &config.network)
    }

    pub fn entries(&self) -> Result<Vec<LedgerEntry>, PublicationError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content =
            fs::read_to_string(&self.path).map_err(|e| PublicationError::Ledger(e.to_string()))?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| PublicationError::Ledger(e.to_string())))
            .collect()
    }
}

impl Ledger for JsonlLedger {
    fn anchor(&self, request: &AnchorRequest) -> Result<String, PublicationError> {
        let entry = LedgerEntry {
            reference: time::new_event_id(),
            ts: time::now_epoch_z(),
            network: self.network.clone(),
            request: request.clone(),
        };
        let line = format!(
            "{}\n",
            serde_json::to_string(&entry).map_err(|e| PublicationError::Ledger(e.to_string()))?
        );

        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| PublicationError::Ledger("ledger append lock poisoned".to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PublicationError::Ledger(e.to_string()))?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PublicationError::Ledger(e.to_string()))?;
        f.write_all(line.as_bytes())
            .map_err(|e| PublicationError::Ledger(e.to_string()))?;
        f.sync_data()
            .map_err(|e| PublicationError::Ledger(e.to_string()))?;
        Ok(entry.reference)
    }
}

/// Cooperative cancellation for a publish attempt (e.g. the operator navigated away).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), PublicationError> {
        if self.is_cancelled() {
            Err(PublicationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `d`, waking early (with `Cancelled`) if the token fires.
    pub fn sleep(&self, d: Duration) -> Result<(), PublicationError> {
        const SLICE: Duration = Duration::from_millis(10);
        let deadline = Instant::now() + d;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicationResult {
    pub unit_uuid: String,
    pub content_address: String,
    pub ledger_reference: String,
    pub link: String,
    /// Whether the upload ran during this call (false when resumed from cache).
    pub uploaded: bool,
    /// Whether anchoring ran during this call.
    pub anchored: bool,
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts. Backoff sleeps honour cancellation.
pub fn retry_publication<F, R>(
    policy: &PublicationConfig,
    cancel: &CancelToken,
    mut attempt: F,
) -> Result<R, UnitpassError>
where
    F: FnMut(u32) -> Result<R, UnitpassError>,
{
    let mut n = 1u32;
    loop {
        match attempt(n) {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && n < policy.max_attempts => {
                let delay = policy.backoff(n);
                warn!(attempt = n, delay_ms = delay.as_millis() as u64, error = %e, "publication attempt failed, retrying");
                cancel.sleep(delay)?;
                n += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    info!(attempts = n, "publication attempts exhausted");
                }
                return Err(e);
            }
        }
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "publish",
        "version": "0.1.0",
        "description": "Certificate upload and ledger anchoring with resumable retry",
        "commands": [
            { "name": "publish", "parameters": ["uuid"] }
        ],
        "storage": ["cas/", "ledger.jsonl"]
    })
}
