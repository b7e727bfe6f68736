//! Catalog refresh and other store-to-remote coordination.
//!
//! The [`SyncCoordinator`] is the only component that pulls the full remote
//! catalog into the [`LocalStore`]. A refresh compares the remote catalog
//! version against the last applied one and fetches only when the remote is
//! newer. Every network read happens before the single local transaction, so
//! a failed refresh leaves the cache and its version untouched.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::error::StoreError;
use crate::model::ServiceDetail;
use crate::remote::{RemoteCatalog, RemoteError};
use crate::store::LocalStore;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Network is offline")]
    Offline,

    #[error("Remote catalog error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    /// The service is not in the local cache.
    #[error("Unknown service: {0}")]
    UnknownService(String),
}

impl SyncError {
    /// Whether retrying later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Offline | Self::Remote(RemoteError::Http(_)))
    }
}

// ============================================================================
// Outcomes and Policy
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The local catalog already matches the remote version.
    UpToDate { version: i64 },
    /// The full remote catalog was applied.
    Refreshed {
        from: Option<i64>,
        to: i64,
        services: usize,
        details: usize,
    },
}

/// Retry schedule for background refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

// ============================================================================
// Sync Coordinator
// ============================================================================

#[derive(Clone)]
pub struct SyncCoordinator {
    store: LocalStore,
    remote: Arc<dyn RemoteCatalog>,
    connectivity: Connectivity,
}

impl SyncCoordinator {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteCatalog>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
        }
    }

    /// Bring the local catalog up to the remote version.
    pub async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }

        let remote_version = self.remote.catalog_version().await?;
        let local_version = self.store.catalog_version()?;

        match local_version {
            Some(local) if remote_version <= local => {
                debug!("Catalog up to date (local {local}, remote {remote_version})");
                return Ok(RefreshOutcome::UpToDate { version: local });
            }
            _ => {}
        }

        info!(
            "Refreshing catalog from {} to {remote_version}",
            local_version.map_or_else(|| "nothing".to_string(), |v| v.to_string())
        );
        let services = self.remote.fetch_services().await?;
        let details = self.remote.fetch_service_details().await?;

        let (services, details) = self
            .store
            .replace_catalog(&services, &details, remote_version)?;
        info!("Applied catalog version {remote_version}: {services} services, {details} details");

        Ok(RefreshOutcome::Refreshed {
            from: local_version,
            to: remote_version,
            services,
            details,
        })
    }

    /// [`refresh`](Self::refresh), retried on transient failures.
    pub async fn refresh_with_retry(
        &self,
        policy: RetryPolicy,
    ) -> Result<RefreshOutcome, SyncError> {
        let mut attempt = 1;
        loop {
            match self.refresh().await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!("Refresh attempt {attempt} failed: {e}; retrying in {delay:?}");
                    if matches!(e, SyncError::Offline) {
                        tokio::select! {
                            _ = self.connectivity.wait_online() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Refresh failed after {attempt} attempt(s): {e}");
                    return Err(e);
                }
            }
        }
    }

    /// Run [`refresh_with_retry`](Self::refresh_with_retry) as a background
    /// task.
    pub fn spawn_refresh(&self, policy: RetryPolicy) -> JoinHandle<Result<RefreshOutcome, SyncError>> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.refresh_with_retry(policy).await })
    }

    /// The detail for `service_id`, fetched from the remote catalog the first
    /// time it is needed.
    ///
    /// Remote failures and offline mode yield `Ok(None)`; only local store
    /// failures are errors.
    pub async fn ensure_detail(&self, service_id: &str) -> Result<Option<ServiceDetail>, SyncError> {
        if let Some(detail) = self.store.get_detail(service_id)? {
            return Ok(Some(detail));
        }
        if !self.connectivity.is_online() {
            debug!("Offline, no detail for '{service_id}'");
            return Ok(None);
        }

        let detail = match self.remote.fetch_service_detail(service_id).await {
            Ok(Some(detail)) => detail,
            Ok(None) => {
                debug!("Remote has no detail for '{service_id}'");
                return Ok(None);
            }
            Err(e) => {
                warn!("Failed to fetch detail for '{service_id}': {e}");
                return Ok(None);
            }
        };

        if self.store.get_service(service_id)?.is_some() {
            self.store.upsert_details(std::slice::from_ref(&detail))?;
        }
        Ok(Some(detail))
    }

    /// Push a locally cached service and its detail to the remote store.
    pub async fn publish(&self, service_id: &str) -> Result<(), SyncError> {
        let service = self
            .store
            .get_service(service_id)?
            .ok_or_else(|| SyncError::UnknownService(service_id.to_string()))?;
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        let detail = self.store.get_detail(service_id)?;

        self.remote
            .publish_service(&service, detail.as_ref())
            .await?;
        info!("Published service '{service_id}'");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
