//! Three-step search waterfall: local cache, remote keywords, generation.
//!
//! The local step runs synchronously and its result is handed back at once.
//! Only when it comes back empty is an escalation task spawned; that task
//! tries the remote keyword search and then the generative fallback, and
//! writes whatever it finds into the [`LocalStore`]. Live local queries pick
//! the new rows up from there.
//!
//! Escalations are never cancelled. A slow escalation for an old query may
//! still write its (idempotent) rows after a newer query started.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::error::StoreError;
use crate::generate::generate_service;
use crate::live::LiveQuery;
use crate::llm::LlmClient;
use crate::model::ServiceSummary;
use crate::remote::RemoteCatalog;
use crate::store::LocalStore;

/// Upper bound on tokens sent to the remote keyword query.
pub const MAX_QUERY_TOKENS: usize = 10;

/// Tokens shorter than this many characters are dropped.
pub const MIN_TOKEN_CHARS: usize = 2;

/// Runs of characters that are not letters, combining marks or digits.
///
/// Marks are part of words so Bengali vowel signs and the hasant stay
/// inside the word they belong to.
pub(crate) fn word_separator() -> &'static Regex {
    static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"[^\p{L}\p{M}\p{N}]+").expect("separator pattern is valid")
    });
    &SEPARATOR
}

/// Split a query into lowercase keyword tokens for the remote search.
pub fn tokenize(query: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in word_separator().split(&query.to_lowercase()) {
        if token.chars().count() < MIN_TOKEN_CHARS || tokens.iter().any(|t| t == token) {
            continue;
        }
        tokens.push(token.to_string());
        if tokens.len() == MAX_QUERY_TOKENS {
            break;
        }
    }
    tokens
}

/// Whether a remote hit actually answers `query`.
///
/// True when the trimmed query occurs, case-insensitively, in either title
/// variant, or equals one of the hit's keywords.
pub fn is_relevant(service: &ServiceSummary, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return false;
    }
    service.title.contains_lowercase(&needle)
        || service
            .search_keywords
            .iter()
            .any(|k| k.trim().to_lowercase() == needle)
}

// ============================================================================
// Escalation
// ============================================================================

/// What an escalation found.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    /// Relevant remote hits, now cached locally.
    Remote(Vec<ServiceSummary>),
    /// A generated service, now cached locally.
    Generated(ServiceSummary),
    /// Neither step produced anything.
    Nothing,
}

impl EscalationOutcome {
    pub fn into_services(self) -> Vec<ServiceSummary> {
        match self {
            Self::Remote(services) => services,
            Self::Generated(service) => vec![service],
            Self::Nothing => Vec::new(),
        }
    }
}

/// Handle to a running escalation.
///
/// Await it with [`finish`](Escalation::finish) or drop it; dropping detaches
/// the task without cancelling it.
pub struct Escalation {
    query: String,
    handle: JoinHandle<EscalationOutcome>,
}

impl Escalation {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn finish(self) -> EscalationOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Escalation for '{}' aborted: {e}", self.query);
                EscalationOutcome::Nothing
            }
        }
    }
}

/// Result of the synchronous local step.
pub struct SearchOutcome {
    pub local: Vec<ServiceSummary>,
    /// Present only when the local step came back empty.
    pub escalation: Option<Escalation>,
}

// ============================================================================
// Search Waterfall
// ============================================================================

#[derive(Clone)]
pub struct SearchWaterfall {
    store: LocalStore,
    remote: Option<Arc<dyn RemoteCatalog>>,
    llm: Option<Arc<dyn LlmClient>>,
    connectivity: Connectivity,
}

impl SearchWaterfall {
    /// A waterfall without a generative step; see
    /// [`with_generator`](Self::with_generator).
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteCatalog>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            remote: Some(remote),
            llm: None,
            connectivity,
        }
    }

    /// A waterfall with no hosted catalog. Escalation goes straight to the
    /// generator, if one is attached.
    pub fn without_remote(store: LocalStore, connectivity: Connectivity) -> Self {
        Self {
            store,
            remote: None,
            llm: None,
            connectivity,
        }
    }

    pub fn with_generator(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Live local results for `query`; re-emits as escalations land rows.
    pub fn watch(&self, query: &str) -> LiveQuery<Vec<ServiceSummary>> {
        self.store.search(query)
    }

    /// Run the local step and, if it is empty, spawn the escalation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime and escalation is needed.
    pub fn search(&self, query: &str) -> Result<SearchOutcome, StoreError> {
        let local = self.store.search_once(query)?;
        if !local.is_empty() || query.trim().is_empty() {
            debug!("Local search for '{query}' returned {} results", local.len());
            return Ok(SearchOutcome {
                local,
                escalation: None,
            });
        }

        let query = query.trim().to_string();
        let waterfall = self.clone();
        let task_query = query.clone();
        let handle = tokio::spawn(async move { waterfall.escalate(&task_query).await });

        Ok(SearchOutcome {
            local,
            escalation: Some(Escalation { query, handle }),
        })
    }

    /// Local results, or the escalation's results when there are none.
    pub async fn resolve(&self, query: &str) -> Result<Vec<ServiceSummary>, StoreError> {
        let outcome = self.search(query)?;
        match outcome.escalation {
            Some(escalation) => Ok(escalation.finish().await.into_services()),
            None => Ok(outcome.local),
        }
    }

    async fn escalate(&self, query: &str) -> EscalationOutcome {
        if !self.connectivity.is_online() {
            debug!("Offline, not escalating '{query}'");
            return EscalationOutcome::Nothing;
        }

        let relevant = self.search_remote(query).await;
        if !relevant.is_empty() {
            if let Err(e) = self.store.upsert_services(&relevant) {
                warn!("Failed to cache remote hits for '{query}': {e}");
            }
            info!("Remote search for '{query}' found {} services", relevant.len());
            return EscalationOutcome::Remote(relevant);
        }

        let Some(llm) = &self.llm else {
            return EscalationOutcome::Nothing;
        };
        match generate_service(llm.as_ref(), query).await {
            Some(generated) => {
                if let Err(e) = self
                    .store
                    .upsert_service_with_detail(&generated.summary, &generated.detail)
                {
                    warn!("Failed to cache generated service for '{query}': {e}");
                }
                info!("Generated service '{}' for '{query}'", generated.summary.id);
                EscalationOutcome::Generated(generated.summary)
            }
            None => EscalationOutcome::Nothing,
        }
    }

    /// Relevant remote hits for `query`, deduplicated by id. Failures, a
    /// missing catalog and queries without usable tokens yield an empty list.
    async fn search_remote(&self, query: &str) -> Vec<ServiceSummary> {
        let Some(remote) = &self.remote else {
            return Vec::new();
        };
        let tokens = tokenize(query);
        if tokens.is_empty() {
            debug!("No searchable tokens in '{query}'");
            return Vec::new();
        }

        let hits = match remote.search_by_keywords(&tokens).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Remote keyword search for '{query}' failed: {e}");
                return Vec::new();
            }
        };

        let mut relevant: Vec<ServiceSummary> = Vec::new();
        for hit in hits {
            if is_relevant(&hit, query) && !relevant.iter().any(|r| r.id == hit.id) {
                relevant.push(hit);
            }
        }
        relevant
    }
}

// ============================================================================
// Tests
// ============================================================================
