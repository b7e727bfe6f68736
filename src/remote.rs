//! Read-mostly access to the hosted service catalog.
//!
//! This module provides the [`RemoteCatalog`] trait consumed by the sync
//! coordinator and the search waterfall. Implementations never touch the
//! local store and never retry; a call either returns a value or fails with a
//! [`RemoteError`].
//!
//! - [`FirestoreCatalog`](crate::firestore::FirestoreCatalog): production
//!   adapter over the Firestore REST API
//! - `MockRemoteCatalog`: test double that counts calls

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{ServiceDetail, ServiceSummary};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while talking to the remote catalog.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP or network error occurred.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The remote answered with something that is not a catalog document.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A user-scoped operation was attempted without an identity token.
    #[error("Not signed in")]
    NotSignedIn,

    /// Required configuration is missing from the environment.
    #[error("{0} environment variable not set")]
    MissingConfig(&'static str),
}

// ============================================================================
// RemoteCatalog Trait
// ============================================================================

/// The hosted catalog: a version document, a services collection and a
/// service details collection.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Current catalog version from the `config/catalog` document.
    async fn catalog_version(&self) -> Result<i64, RemoteError>;

    /// Every document in the services collection.
    async fn fetch_services(&self) -> Result<Vec<ServiceSummary>, RemoteError>;

    /// Every document in the service details collection.
    async fn fetch_service_details(&self) -> Result<Vec<ServiceDetail>, RemoteError>;

    /// The detail document for one service, if it exists.
    async fn fetch_service_detail(
        &self,
        service_id: &str,
    ) -> Result<Option<ServiceDetail>, RemoteError>;

    /// Services whose keyword list contains any of `tokens`.
    ///
    /// Callers pass at most 10 tokens.
    async fn search_by_keywords(
        &self,
        tokens: &[String],
    ) -> Result<Vec<ServiceSummary>, RemoteError>;

    /// Write a service and its detail to the remote store on behalf of the
    /// signed-in user.
    async fn publish_service(
        &self,
        service: &ServiceSummary,
        detail: Option<&ServiceDetail>,
    ) -> Result<(), RemoteError>;
}

// ============================================================================
// Mock Implementation (Test Only)
// ============================================================================

#[cfg(test)]
pub(crate) use mock::MockRemoteCatalog;
