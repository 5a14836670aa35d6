//! Existence checks: does every row of a batch have a registry counterpart?

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::fields::{Field, FieldSet};
use crate::gateway::{ActivityGateway, ActivityQuery, RegistryRecord};
use crate::table::{Endpoint, ExchangeTable, FlowMatch, ProcessMatch};
use crate::{FlowKind, ReconcileConfig, ReconcileError, Side};

/// Distinct non-missing values of a text field across `endpoints`.
pub(crate) fn distinct_values(endpoints: &[&Endpoint], field: Field) -> BTreeSet<String> {
    endpoints.iter().filter_map(|endpoint| endpoint.text(field)).map(str::to_string).collect()
}

/// Candidate query over every registry dimension the field set can constrain.
pub(crate) fn candidate_query(field_set: &FieldSet, endpoints: &[&Endpoint]) -> ActivityQuery {
    field_set.query_dimensions().fold(ActivityQuery::new(), |query, (field, dimension)| {
        query.with(dimension, distinct_values(endpoints, field))
    })
}

/// Databases that hold each `(name, product, location)` tuple among `records`.
pub(crate) fn process_databases(
    records: &[RegistryRecord],
) -> BTreeMap<ProcessMatch<'_>, BTreeSet<&str>> {
    let mut databases: BTreeMap<_, BTreeSet<&str>> = BTreeMap::new();
    for record in records {
        if let Some(tuple) = record.process_match() {
            databases.entry(tuple).or_default().insert(record.database.as_str());
        }
    }
    databases
}

/// A row counts only when its tuple exists in the row's own database.
fn has_process_counterpart(
    databases: &BTreeMap<ProcessMatch<'_>, BTreeSet<&str>>,
    endpoint: &Endpoint,
) -> bool {
    endpoint.process_match().and_then(|row| databases.get(&row)).is_some_and(|found| {
        endpoint.database.as_deref().is_none_or(|database| found.contains(database))
    })
}

fn rows_of_kind<'a>(
    endpoints: &[&'a Endpoint],
    kind: FlowKind,
    config: &ReconcileConfig,
) -> Vec<&'a Endpoint> {
    endpoints.iter().copied().filter(|endpoint| endpoint.kind(config) == kind).collect()
}

/// Check that every technosphere row on `side` names a known activity.
///
/// Rows in the biosphere database are ignored.
///
/// # Errors
/// Returns [`ReconcileError::Gateway`] when the registry query fails.
pub fn all_activities_found<G: ActivityGateway + ?Sized>(
    gateway: &G,
    table: &ExchangeTable,
    side: Side,
    config: &ReconcileConfig,
) -> Result<bool, ReconcileError> {
    let endpoints: Vec<&Endpoint> = table.endpoints(side).collect();
    activities_found(gateway, &endpoints, side, config)
}

/// Endpoint-level form of [`all_activities_found`].
///
/// # Errors
/// Returns [`ReconcileError::Gateway`] when the registry query fails.
pub fn activities_found<G: ActivityGateway + ?Sized>(
    gateway: &G,
    endpoints: &[&Endpoint],
    side: Side,
    config: &ReconcileConfig,
) -> Result<bool, ReconcileError> {
    let field_set = FieldSet::select(FlowKind::Technosphere, side);
    let kept = rows_of_kind(endpoints, FlowKind::Technosphere, config);
    if kept.is_empty() {
        return Ok(true);
    }

    let records = gateway.query(&candidate_query(&field_set, &kept))?;
    let databases = process_databases(&records);
    let unmatched =
        kept.iter().filter(|endpoint| !has_process_counterpart(&databases, endpoint)).count();

    debug!(
        columns = ?field_set.column_names(),
        rows = kept.len(),
        candidates = records.len(),
        unmatched,
        "checked technosphere rows against registry"
    );
    if unmatched > 0 {
        warn!(side = %side, unmatched, "technosphere rows missing from registry");
    }
    Ok(unmatched == 0)
}

/// Check that every biosphere row on `side` names a known flow with matching
/// categories.
///
/// Only rows in the biosphere database are considered. Registry flows without
/// categories never match.
///
/// # Errors
/// Returns [`ReconcileError::Gateway`] when the registry query fails.
pub fn all_flows_found<G: ActivityGateway + ?Sized>(
    gateway: &G,
    table: &ExchangeTable,
    side: Side,
    config: &ReconcileConfig,
) -> Result<bool, ReconcileError> {
    let endpoints: Vec<&Endpoint> = table.endpoints(side).collect();
    flows_found(gateway, &endpoints, side, config)
}

/// Endpoint-level form of [`all_flows_found`].
///
/// # Errors
/// Returns [`ReconcileError::Gateway`] when the registry query fails.
pub fn flows_found<G: ActivityGateway + ?Sized>(
    gateway: &G,
    endpoints: &[&Endpoint],
    side: Side,
    config: &ReconcileConfig,
) -> Result<bool, ReconcileError> {
    let field_set = FieldSet::select(FlowKind::Biosphere, side);
    let kept = rows_of_kind(endpoints, FlowKind::Biosphere, config);
    if kept.is_empty() {
        return Ok(true);
    }

    let records = gateway.query(&candidate_query(&field_set, &kept))?;
    let matches: BTreeSet<FlowMatch<'_>> =
        records.iter().filter_map(|record| record.flow_match()).collect();
    let unmatched = kept
        .iter()
        .filter(|endpoint| endpoint.flow_match().is_none_or(|row| !matches.contains(&row)))
        .count();

    debug!(
        columns = ?field_set.column_names(),
        rows = kept.len(),
        candidates = records.len(),
        unmatched,
        "checked biosphere rows against registry"
    );
    if unmatched > 0 {
        warn!(side = %side, unmatched, "biosphere rows missing from registry");
    }
    Ok(unmatched == 0)
}
