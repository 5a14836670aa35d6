//! Canonical keys back to descriptive fields.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::gateway::{ActivityGateway, ActivityQuery, Dimension, RecordPayload, RegistryRecord};
use crate::fields::{Column, Field};
use crate::table::{CellValue, ExchangeTable};
use crate::{CanonicalKey, Categories, ReconcileError, Side, MISSING_KEYS};

/// Descriptive fields of one registry record, as they fill an endpoint.
///
/// Processes carry product and location; flows carry categories when the
/// registry knows them. Fields a record lacks stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointFields {
    pub name: String,
    pub product: Option<String>,
    pub location: Option<String>,
    pub categories: Option<Categories>,
    pub database: String,
}

impl EndpointFields {
    #[must_use]
    pub fn from_record(record: &RegistryRecord) -> Self {
        match &record.payload {
            RecordPayload::Process => Self {
                name: record.name.clone(),
                product: record.product.clone(),
                location: record.location.clone(),
                categories: None,
                database: record.database.clone(),
            },
            RecordPayload::Flow { categories, .. } => Self {
                name: record.name.clone(),
                product: None,
                location: None,
                categories: categories.clone(),
                database: record.database.clone(),
            },
        }
    }
}

/// Look up the descriptive fields for every key, preserving input order.
///
/// # Errors
/// Returns [`ReconcileError::LookupMiss`] when a key has no registry record, or
/// [`ReconcileError::Gateway`] on registry failure.
pub fn convert_key_to_fields<G: ActivityGateway + ?Sized>(
    gateway: &G,
    keys: &[CanonicalKey],
) -> Result<Vec<EndpointFields>, ReconcileError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let distinct: BTreeSet<&CanonicalKey> = keys.iter().collect();
    let query = ActivityQuery::new()
        .with(Dimension::Database, distinct.iter().map(|key| key.database.as_str()))
        .with(Dimension::Code, distinct.iter().map(|key| key.code.as_str()));
    let records = gateway.query(&query)?;

    // Database and code sets cross-combine; exact keys keep stray records inert.
    let by_key: BTreeMap<CanonicalKey, EndpointFields> =
        records.iter().map(|record| (record.key(), EndpointFields::from_record(record))).collect();
    debug!(keys = distinct.len(), records = records.len(), "expanding keys to fields");

    keys.iter()
        .map(|key| {
            by_key
                .get(key)
                .cloned()
                .ok_or_else(|| {
                    ReconcileError::LookupMiss(format!("no registry record for key {key}"))
                })
        })
        .collect()
}

/// Expand the `side` key column of `table`.
///
/// # Errors
/// Returns [`ReconcileError::Precondition`] when a row has no key on `side`,
/// otherwise the errors of [`convert_key_to_fields`].
pub fn expand_side<G: ActivityGateway + ?Sized>(
    gateway: &G,
    table: &ExchangeTable,
    side: Side,
) -> Result<Vec<EndpointFields>, ReconcileError> {
    let keys = table
        .column(Column::new(side, Field::Key))
        .into_iter()
        .enumerate()
        .map(|(index, cell)| match cell {
            Some(CellValue::Key(key)) => Ok(key.clone()),
            _ => Err(ReconcileError::Precondition(format!(
                "{MISSING_KEYS} ({side} key missing in row {index})"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    convert_key_to_fields(gateway, &keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{flow, process};
    use crate::gateway::InMemoryRegistry;
    use crate::table::{Endpoint, ExchangeRecord};

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::new(vec![
            process("ecoinvent", "code123", "Steel production", "steel", "DE"),
            process("ecoinvent", "co2", "Carbon capture", "captured carbon", "NO"),
            flow("biosphere3", "co2", "Carbon dioxide", Some(&["air", "urban"])),
            flow("biosphere3", "ch4", "Methane", None),
        ])
    }

    #[test]
    fn process_key_expands_to_product_and_location() -> Result<(), ReconcileError> {
        let key = CanonicalKey::new("ecoinvent", "code123");
        let fields = convert_key_to_fields(&registry(), &[key])?;
        assert_eq!(
            fields,
            vec![EndpointFields {
                name: "Steel production".to_string(),
                product: Some("steel".to_string()),
                location: Some("DE".to_string()),
                categories: None,
                database: "ecoinvent".to_string(),
            }]
        );
        Ok(())
    }

    #[test]
    fn flow_key_expands_to_categories() -> Result<(), ReconcileError> {
        let fields = convert_key_to_fields(
            &registry(),
            &[CanonicalKey::new("biosphere3", "co2"), CanonicalKey::new("biosphere3", "ch4")],
        )?;
        assert_eq!(fields[0].name, "Carbon dioxide");
        assert_eq!(fields[0].product, None);
        assert_eq!(fields[0].location, None);
        assert_eq!(fields[0].categories, Some(Categories::new(["air", "urban"])));
        assert_eq!(fields[1].name, "Methane");
        assert_eq!(fields[1].categories, None);
        assert_eq!(fields[1].database, "biosphere3");
        Ok(())
    }

    #[test]
    fn cross_combined_keys_do_not_leak() -> Result<(), ReconcileError> {
        // (ecoinvent, co2) satisfies both value sets but was never asked for.
        let keys =
            [CanonicalKey::new("biosphere3", "co2"), CanonicalKey::new("ecoinvent", "code123")];
        let fields = convert_key_to_fields(&registry(), &keys)?;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "Carbon dioxide");
        assert_eq!(fields[1].name, "Steel production");
        assert!(fields.iter().all(|fields| fields.name != "Carbon capture"));
        Ok(())
    }

    #[test]
    fn unknown_key_is_a_lookup_miss() {
        let result = convert_key_to_fields(&registry(), &[CanonicalKey::new("ecoinvent", "nope")]);
        assert!(matches!(
            result,
            Err(ReconcileError::LookupMiss(message)) if message.contains("nope")
        ));
    }

    #[test]
    fn expand_side_requires_every_key() {
        let table = ExchangeTable::new(vec![ExchangeRecord::new(
            Endpoint {
                key: Some(CanonicalKey::new("ecoinvent", "code123")),
                ..Endpoint::default()
            },
            Endpoint::default(),
        )]);
        assert!(expand_side(&registry(), &table, Side::From).is_ok());
        assert!(matches!(
            expand_side(&registry(), &table, Side::To),
            Err(ReconcileError::Precondition(_))
        ));
    }

    #[test]
    fn repeated_keys_share_one_query() -> Result<(), ReconcileError> {
        let registry = registry();
        let key = CanonicalKey::new("ecoinvent", "code123");
        let fields = convert_key_to_fields(&registry, &[key.clone(), key.clone(), key])?;
        assert_eq!(fields.len(), 3);
        assert_eq!(registry.query_count(), 1);
        Ok(())
    }
}
