//! Reconciliation of superstructure exchange rows against an activity registry.
//!
//! Rows describe a `from` and a `to` endpoint either through descriptive fields
//! (name, reference product, location or categories, database) or through a
//! canonical `(database, code)` key. The functions in this crate check that rows
//! exist in the registry, resolve descriptive fields into keys, and expand keys
//! back into descriptive fields. The registry itself is reached only through the
//! [`ActivityGateway`] trait.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub mod complete;
pub mod config;
pub mod expand;
pub mod fields;
pub mod gateway;
pub mod resolve;
pub mod table;
pub mod validate;

#[cfg(test)]
mod fixtures;

pub use complete::{complete_batch, fill_out_with_fields, fill_out_with_keys, CompletionReport};
pub use config::ReconcileConfig;
pub use expand::{convert_key_to_fields, expand_side, EndpointFields};
pub use fields::{side_columns, Column, Field, FieldSet};
pub use gateway::{
    ActivityGateway, ActivityQuery, Dimension, InMemoryRegistry, RecordPayload, RegistryRecord,
};
pub use resolve::{convert_fields_to_key, resolve_flow_keys, resolve_process_keys};
pub use table::{CellValue, Endpoint, ExchangeRecord, ExchangeTable, FlowMatch, ProcessMatch};
pub use validate::{activities_found, all_activities_found, all_flows_found, flows_found};

/// Message carried by [`ReconcileError::Validation`] when technosphere rows are unknown.
pub const MISSING_PROCESSES: &str = "some processes could not be found in the database";
/// Message carried by [`ReconcileError::Validation`] when biosphere rows are unknown.
pub const MISSING_FLOWS: &str = "some biosphere flows could not be found in the database";
/// Message carried by [`ReconcileError::Precondition`] when keys are missing.
pub const MISSING_KEYS: &str = "all keys should be known before running this method";

/// Failure of a reconciliation pass. Every variant carries a human-readable message.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ReconcileError {
    /// Some rows have no registry counterpart, or are of a kind the pass cannot take.
    #[error("validation error: {0}")]
    Validation(String),
    /// A row or key was not found where an earlier check expected it.
    #[error("lookup miss: {0}")]
    LookupMiss(String),
    /// Several registry records fit one row.
    #[error("ambiguous match: {0}")]
    Ambiguous(String),
    /// The batch was handed over in a state the operation does not accept.
    #[error("precondition breach: {0}")]
    Precondition(String),
    /// The registry behind the gateway failed.
    #[error("gateway error: {0}")]
    Gateway(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// `(database, code)` pair identifying exactly one registry record.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct CanonicalKey {
    pub database: String,
    pub code: String,
}

impl CanonicalKey {
    #[must_use]
    pub fn new(database: impl Into<String>, code: impl Into<String>) -> Self {
        Self { database: database.into(), code: code.into() }
    }
}

impl From<(String, String)> for CanonicalKey {
    fn from((database, code): (String, String)) -> Self {
        Self { database, code }
    }
}

impl From<CanonicalKey> for (String, String) {
    fn from(key: CanonicalKey) -> Self {
        (key.database, key.code)
    }
}

impl Display for CanonicalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.database, self.code)
    }
}

/// Ordered environmental compartment path of a biosphere flow, e.g. `air::urban`.
#[derive(Debug, Clone, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct Categories(pub Vec<String>);

impl Categories {
    #[must_use]
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Parse the tuple notation spreadsheets use for categories: `('air', 'urban')`.
    ///
    /// A bare value without parentheses is read as a single category. Commas
    /// inside a quoted item belong to that item, as in `('water', 'ground-, long-term')`.
    #[must_use]
    pub fn parse_tuple_repr(raw: &str) -> Self {
        let trimmed = raw.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(trimmed);

        let mut parts = Vec::new();
        let mut current = String::new();
        let mut open_quote: Option<char> = None;
        for ch in inner.chars() {
            match open_quote {
                Some(quote) if ch == quote => open_quote = None,
                Some(_) => current.push(ch),
                None if ch == '\'' || ch == '"' => open_quote = Some(ch),
                None if ch == ',' => parts.push(std::mem::take(&mut current)),
                None => current.push(ch),
            }
        }
        parts.push(current);

        Self(
            parts
                .into_iter()
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect(),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Categories {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Parts(Vec<String>),
            Repr(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Parts(parts) => Self(parts),
            Raw::Repr(raw) => Self::parse_tuple_repr(&raw),
        })
    }
}

impl Display for Categories {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("::"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    From,
    To,
}

impl Side {
    pub const ALL: [Self; 2] = [Self::From, Self::To];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::From => "from",
            Self::To => "to",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "from" => Some(Self::From),
            "to" => Some(Self::To),
            _ => None,
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Technosphere,
    Biosphere,
}

impl FlowKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Technosphere => "technosphere",
            Self::Biosphere => "biosphere",
        }
    }

    /// Rows whose database is the configured biosphere database are biosphere flows.
    #[must_use]
    pub fn classify(database: Option<&str>, config: &ReconcileConfig) -> Self {
        if config.is_biosphere(database) {
            Self::Biosphere
        } else {
            Self::Technosphere
        }
    }
}

impl Display for FlowKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_serializes_as_pair() {
        let key = CanonicalKey::new("ecoinvent", "code123");
        let json = match serde_json::to_string(&key) {
            Ok(json) => json,
            Err(err) => panic!("key should serialize: {err}"),
        };
        assert_eq!(json, r#"["ecoinvent","code123"]"#);

        let back: CanonicalKey = match serde_json::from_str(&json) {
            Ok(key) => key,
            Err(err) => panic!("key should deserialize: {err}"),
        };
        assert_eq!(back, key);
    }

    #[test]
    fn categories_accept_list_and_tuple_repr() {
        let from_list: Categories = match serde_json::from_str(r#"["air", "urban"]"#) {
            Ok(value) => value,
            Err(err) => panic!("list form should parse: {err}"),
        };
        let from_repr: Categories = match serde_json::from_str(r#""('air', 'urban')""#) {
            Ok(value) => value,
            Err(err) => panic!("tuple repr should parse: {err}"),
        };
        assert_eq!(from_list, Categories::new(["air", "urban"]));
        assert_eq!(from_repr, from_list);
        assert_eq!(Categories::parse_tuple_repr("('water',)"), Categories::new(["water"]));
        assert_eq!(Categories::parse_tuple_repr("soil"), Categories::new(["soil"]));
    }

    #[test]
    fn quoted_categories_keep_their_commas() {
        assert_eq!(
            Categories::parse_tuple_repr("('water', 'ground-, long-term')"),
            Categories::new(["water", "ground-, long-term"])
        );
        assert_eq!(
            Categories::parse_tuple_repr(r#"('air', "low population density, long-term")"#),
            Categories::new(["air", "low population density, long-term"])
        );
        assert_eq!(
            Categories::parse_tuple_repr(r#"("soil", "farmer's field")"#),
            Categories::new(["soil", "farmer's field"])
        );
    }

    #[test]
    fn flow_kind_follows_biosphere_database() {
        let config = ReconcileConfig::default();
        assert_eq!(FlowKind::classify(Some("biosphere3"), &config), FlowKind::Biosphere);
        assert_eq!(FlowKind::classify(Some("ecoinvent"), &config), FlowKind::Technosphere);
        assert_eq!(FlowKind::classify(None, &config), FlowKind::Technosphere);
    }

    mod round_trip {
        use proptest::prelude::*;

        use crate::gateway::{InMemoryRegistry, RecordPayload, RegistryRecord};
        use crate::table::{Endpoint, ExchangeRecord, ExchangeTable};
        use crate::{
            activities_found, convert_fields_to_key, fill_out_with_fields, fill_out_with_keys,
            flows_found, Categories, EndpointFields, ReconcileConfig, ReconcileError, Side,
        };

        const PRODUCTS: [&str; 3] = ["steel", "electricity", "cement"];
        const LOCATIONS: [&str; 4] = ["DE", "FR", "GLO", "RER"];
        const DATABASES: [&str; 2] = ["ecoinvent", "custom"];

        fn registry_records() -> impl Strategy<Value = Vec<RegistryRecord>> {
            prop::collection::vec((0_usize..3, 0_usize..4, 0_usize..2, any::<bool>()), 1..12)
                .prop_map(|specs| {
                    specs
                        .into_iter()
                        .enumerate()
                        .map(|(index, (product, location, database, is_flow))| {
                            if is_flow {
                                RegistryRecord {
                                    database: "biosphere3".to_string(),
                                    code: format!("flow-{index}"),
                                    name: format!("flow {index}"),
                                    product: None,
                                    location: None,
                                    payload: RecordPayload::Flow {
                                        flow_type: None,
                                        categories: Some(Categories::new([
                                            "air",
                                            LOCATIONS[location],
                                        ])),
                                    },
                                }
                            } else {
                                RegistryRecord {
                                    database: DATABASES[database].to_string(),
                                    code: format!("act-{index}"),
                                    name: format!("activity {index}"),
                                    product: Some(PRODUCTS[product].to_string()),
                                    location: Some(LOCATIONS[location].to_string()),
                                    payload: RecordPayload::Process,
                                }
                            }
                        })
                        .collect()
                })
        }

        fn described(record: &RegistryRecord) -> Endpoint {
            let fields = EndpointFields::from_record(record);
            Endpoint {
                name: Some(fields.name),
                product: fields.product,
                location: fields.location,
                categories: fields.categories,
                database: Some(fields.database),
                key: None,
            }
        }

        proptest! {
            #[test]
            fn fields_to_keys_to_fields_round_trips(
                records in registry_records(),
                picks in prop::collection::vec(any::<prop::sample::Index>(), 1..20),
            ) {
                let registry = InMemoryRegistry::new(records.clone());
                let config = ReconcileConfig::default();
                let rows: Vec<ExchangeRecord> = picks
                    .iter()
                    .map(|pick| {
                        let record = pick.get(&records);
                        let to = Endpoint { key: Some(record.key()), ..Endpoint::default() };
                        ExchangeRecord::new(described(record), to)
                    })
                    .collect();
                let mut table = ExchangeTable::new(rows);

                let endpoints: Vec<&Endpoint> = table.endpoints(Side::From).collect();
                let activities = activities_found(&registry, &endpoints, Side::From, &config);
                prop_assert!(matches!(activities, Ok(true)));
                let flows = flows_found(&registry, &endpoints, Side::From, &config);
                prop_assert!(matches!(flows, Ok(true)));

                let original = table.clone();
                prop_assert!(fill_out_with_fields(&registry, &mut table, &config).is_ok());
                prop_assert!(fill_out_with_keys(&registry, &mut table).is_ok());

                for ((row, before), pick) in table.rows().iter().zip(original.rows()).zip(&picks) {
                    let record = pick.get(&records);
                    prop_assert_eq!(row.from.key.as_ref(), Some(&record.key()));
                    let mut expected = before.from.clone();
                    expected.key = Some(record.key());
                    prop_assert_eq!(&row.from, &expected);
                }
            }

            #[test]
            fn rows_in_the_wrong_database_never_resolve(
                records in registry_records(),
                picks in prop::collection::vec(
                    (any::<prop::sample::Index>(), any::<bool>()),
                    1..20,
                ),
            ) {
                let registry = InMemoryRegistry::new(records.clone());
                let config = ReconcileConfig::default();
                let mut moved = false;
                let rows: Vec<ExchangeRecord> = picks
                    .iter()
                    .map(|(pick, swap)| {
                        let record = pick.get(&records);
                        let mut from = described(record);
                        if *swap && record.product.is_some() {
                            let other = DATABASES
                                .iter()
                                .find(|database| **database != record.database)
                                .map(|database| (*database).to_string());
                            from.database = other;
                            moved = true;
                        }
                        let to = Endpoint { key: Some(record.key()), ..Endpoint::default() };
                        ExchangeRecord::new(from, to)
                    })
                    .collect();
                let mut table = ExchangeTable::new(rows);

                let endpoints: Vec<&Endpoint> = table.endpoints(Side::From).collect();
                let found = activities_found(&registry, &endpoints, Side::From, &config);
                prop_assert_eq!(found, Ok(!moved));

                let original = table.clone();
                let filled = fill_out_with_fields(&registry, &mut table, &config);
                prop_assert_eq!(filled.is_ok(), !moved);
                if moved {
                    prop_assert_eq!(&table, &original);
                } else {
                    for (row, before) in table.rows().iter().zip(original.rows()) {
                        let database = row.from.key.as_ref().map(|key| key.database.as_str());
                        prop_assert_eq!(database, before.from.database.as_deref());
                    }
                }
            }

            #[test]
            fn technosphere_check_passing_means_resolution_succeeds(
                records in registry_records(),
                picks in prop::collection::vec(any::<prop::sample::Index>(), 1..20),
            ) {
                let registry = InMemoryRegistry::new(records.clone());
                let config = ReconcileConfig::default();
                let rows: Vec<ExchangeRecord> = picks
                    .iter()
                    .map(|pick| {
                        ExchangeRecord::new(described(pick.get(&records)), Endpoint::default())
                    })
                    .collect();
                let table = ExchangeTable::new(rows);

                let endpoints: Vec<&Endpoint> = table.endpoints(Side::From).collect();
                prop_assert!(matches!(
                    activities_found(&registry, &endpoints, Side::From, &config),
                    Ok(true)
                ));
                let has_flows = picks.iter().any(|pick| pick.get(&records).product.is_none());
                match convert_fields_to_key(&registry, &table, Side::From, &config) {
                    Ok(keys) => {
                        prop_assert!(!has_flows);
                        let expected: Vec<_> =
                            picks.iter().map(|pick| pick.get(&records).key()).collect();
                        prop_assert_eq!(keys, expected);
                    }
                    Err(ReconcileError::Validation(_)) => prop_assert!(has_flows),
                    Err(other) => {
                        let message = format!("unexpected resolver error: {other}");
                        return Err(TestCaseError::fail(message));
                    }
                }
            }
        }
    }
}
