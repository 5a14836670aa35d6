//! The registry boundary: set-membership queries over activity records.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::table::{FlowMatch, ProcessMatch};
use crate::{CanonicalKey, Categories, ReconcileError};

/// Registry column a query may constrain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Name,
    Product,
    Location,
    Database,
    Code,
}

impl Dimension {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Product => "product",
            Self::Location => "location",
            Self::Database => "database",
            Self::Code => "code",
        }
    }
}

/// Conjunction of per-dimension membership tests.
///
/// A dimension without a set is unconstrained; a dimension with an empty set
/// matches nothing. Because each dimension is tested on its own, a record can
/// match a combination of values that no single input row carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityQuery {
    constraints: BTreeMap<Dimension, BTreeSet<String>>,
}

impl ActivityQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrain `dimension` to `values`, replacing any earlier set for it.
    #[must_use]
    pub fn with<I, S>(mut self, dimension: Dimension, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints.insert(dimension, values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn constraint(&self, dimension: Dimension) -> Option<&BTreeSet<String>> {
        self.constraints.get(&dimension)
    }

    pub fn constraints(&self) -> impl Iterator<Item = (Dimension, &BTreeSet<String>)> {
        self.constraints.iter().map(|(dimension, values)| (*dimension, values))
    }

    /// True when some constrained dimension has no admissible value.
    #[must_use]
    pub fn is_unsatisfiable(&self) -> bool {
        self.constraints.values().any(BTreeSet::is_empty)
    }

    #[must_use]
    pub fn matches(&self, record: &RegistryRecord) -> bool {
        self.constraints.iter().all(|(dimension, values)| {
            record.dimension_value(*dimension).is_some_and(|value| values.contains(value))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Process,
    Flow {
        #[serde(default)]
        flow_type: Option<String>,
        #[serde(default)]
        categories: Option<Categories>,
    },
}

impl RecordPayload {
    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Flow { .. } => "flow",
        }
    }

    #[must_use]
    pub fn categories(&self) -> Option<&Categories> {
        match self {
            Self::Process => None,
            Self::Flow { categories, .. } => categories.as_ref(),
        }
    }
}

/// Read-only projection of one registry activity or flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryRecord {
    pub database: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(flatten)]
    pub payload: RecordPayload,
}

impl RegistryRecord {
    #[must_use]
    pub fn key(&self) -> CanonicalKey {
        CanonicalKey::new(self.database.clone(), self.code.clone())
    }

    #[must_use]
    pub fn dimension_value(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::Name => Some(self.name.as_str()),
            Dimension::Product => self.product.as_deref(),
            Dimension::Location => self.location.as_deref(),
            Dimension::Database => Some(self.database.as_str()),
            Dimension::Code => Some(self.code.as_str()),
        }
    }

    /// `(name, product, location)` when the record carries all three.
    #[must_use]
    pub fn process_match(&self) -> Option<ProcessMatch<'_>> {
        Some(ProcessMatch {
            name: &self.name,
            product: self.product.as_deref()?,
            location: self.location.as_deref()?,
        })
    }

    /// `(name, categories, database)` for flows that carry categories.
    #[must_use]
    pub fn flow_match(&self) -> Option<FlowMatch<'_>> {
        Some(FlowMatch {
            name: &self.name,
            categories: self.payload.categories()?,
            database: &self.database,
        })
    }
}

/// Query interface over the authoritative activity registry.
///
/// Results are returned in unspecified order and reflect the registry at the
/// moment of the call; implementations do not cache.
pub trait ActivityGateway {
    /// Return every record matching all constrained dimensions of `query`.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Gateway`] when the registry cannot be read.
    fn query(&self, query: &ActivityQuery) -> Result<Vec<RegistryRecord>, ReconcileError>;
}

impl<G: ActivityGateway + ?Sized> ActivityGateway for &G {
    fn query(&self, query: &ActivityQuery) -> Result<Vec<RegistryRecord>, ReconcileError> {
        (**self).query(query)
    }
}

/// Vector-backed registry, mostly useful for fixtures and embedding.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: Vec<RegistryRecord>,
    queries: Cell<usize>,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new(records: Vec<RegistryRecord>) -> Self {
        Self { records, queries: Cell::new(0) }
    }

    pub fn insert(&mut self, record: RegistryRecord) {
        self.records.push(record);
    }

    /// Drop every record whose key equals `key`.
    pub fn remove(&mut self, key: &CanonicalKey) {
        self.records.retain(|record| record.database != key.database || record.code != key.code);
    }

    /// Number of gateway queries served so far.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.get()
    }
}

impl ActivityGateway for InMemoryRegistry {
    fn query(&self, query: &ActivityQuery) -> Result<Vec<RegistryRecord>, ReconcileError> {
        self.queries.set(self.queries.get() + 1);
        if query.is_unsatisfiable() {
            return Ok(Vec::new());
        }
        Ok(self.records.iter().filter(|record| query.matches(record)).cloned().collect())
    }
}
