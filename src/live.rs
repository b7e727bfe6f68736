//! Live queries over the local store.
//!
//! Every write to the store bumps a per-table generation counter published on
//! a [`tokio::sync::watch`] channel. A [`LiveQuery`] remembers the generations
//! it last evaluated against and re-runs its query whenever one of the tables
//! it depends on moves forward.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::StoreError;
use crate::store::LocalStore;

/// Tables a live query can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Services,
    ServiceDetails,
    Favorites,
    History,
    Metadata,
}

impl Table {
    /// Tables whose rows disappear when a service row is deleted.
    pub const CASCADE_FROM_SERVICES: &'static [Table] = &[
        Table::Services,
        Table::ServiceDetails,
        Table::Favorites,
        Table::History,
    ];

    fn index(self) -> usize {
        match self {
            Self::Services => 0,
            Self::ServiceDetails => 1,
            Self::Favorites => 2,
            Self::History => 3,
            Self::Metadata => 4,
        }
    }
}

/// Monotonic write counters, one per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generations([u64; 5]);

impl Generations {
    pub fn get(&self, table: Table) -> u64 {
        self.0[table.index()]
    }

    fn moved_since(&self, earlier: &Generations, tables: &[Table]) -> bool {
        tables.iter().any(|t| self.get(*t) != earlier.get(*t))
    }
}

/// Publishes table generations to all live queries.
pub(crate) struct ChangeNotifier {
    tx: watch::Sender<Generations>,
}

impl ChangeNotifier {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Generations::default());
        Self { tx }
    }

    /// Record a committed write to `tables`.
    pub(crate) fn touch(&self, tables: &[Table]) {
        self.tx.send_modify(|generations| {
            for table in tables {
                generations.0[table.index()] += 1;
            }
        });
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Generations> {
        self.tx.subscribe()
    }

    pub(crate) fn current(&self) -> Generations {
        *self.tx.borrow()
    }
}

type Fetch<T> = Arc<dyn Fn(&LocalStore) -> Result<T, StoreError> + Send + Sync>;

/// A persistent read that yields a fresh result set whenever the rows it
/// depends on change.
///
/// Nothing is read until the first call to [`next`](LiveQuery::next), which
/// always yields immediately. Later calls wait for a relevant write.
pub struct LiveQuery<T> {
    store: LocalStore,
    tables: &'static [Table],
    fetch: Fetch<T>,
    changes: watch::Receiver<Generations>,
    seen: Option<Generations>,
}

impl<T> LiveQuery<T> {
    pub(crate) fn new<F>(store: LocalStore, tables: &'static [Table], fetch: F) -> Self
    where
        F: Fn(&LocalStore) -> Result<T, StoreError> + Send + Sync + 'static,
    {
        let changes = store.notifier().subscribe();
        Self {
            store,
            tables,
            fetch: Arc::new(fetch),
            changes,
            seen: None,
        }
    }

    /// Wait for the next result set.
    ///
    /// The query holds its own store handle, which keeps the notifier
    /// alive. Dropping every other handle therefore does not end the
    /// stream: `next` keeps waiting, and callers stop by dropping the
    /// query. `None` is only reachable if the notifier itself goes away.
    pub async fn next(&mut self) -> Option<Result<T, StoreError>> {
        if let Some(seen) = self.seen {
            loop {
                let current = *self.changes.borrow_and_update();
                if current.moved_since(&seen, self.tables) {
                    break;
                }
                if self.changes.changed().await.is_err() {
                    return None;
                }
            }
        }

        // Snapshot before reading so a write racing the fetch is re-delivered.
        let snapshot = *self.changes.borrow_and_update();
        self.seen = Some(snapshot);
        Some((self.fetch)(&self.store))
    }

    /// Evaluate the query once without affecting the live sequence.
    pub fn current(&self) -> Result<T, StoreError> {
        (self.fetch)(&self.store)
    }

    /// A new sequence over the same query, starting from scratch.
    pub fn restart(&self) -> Self {
        Self {
            store: self.store.clone(),
            tables: self.tables,
            fetch: Arc::clone(&self.fetch),
            changes: self.store.notifier().subscribe(),
            seen: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_bumps_only_named_tables() {
        let notifier = ChangeNotifier::new();
        notifier.touch(&[Table::Favorites]);
        notifier.touch(Table::CASCADE_FROM_SERVICES);

        let generations = notifier.current();
        assert_eq!(generations.get(Table::Services), 1);
        assert_eq!(generations.get(Table::Favorites), 2);
        assert_eq!(generations.get(Table::Metadata), 0);
    }

    #[test]
    fn test_moved_since_filters_by_table() {
        let before = Generations::default();
        let notifier = ChangeNotifier::new();
        notifier.touch(&[Table::History]);
        let after = notifier.current();

        assert!(after.moved_since(&before, &[Table::History]));
        assert!(!after.moved_since(&before, &[Table::Services, Table::Favorites]));
    }
}
