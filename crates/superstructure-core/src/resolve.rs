//! Descriptive fields to canonical keys.

use std::collections::BTreeMap;

use tracing::debug;

use crate::fields::FieldSet;
use crate::gateway::ActivityGateway;
use crate::table::{Endpoint, ExchangeTable};
use crate::validate::{activities_found, candidate_query};
use crate::{CanonicalKey, FlowKind, ReconcileConfig, ReconcileError, Side, MISSING_PROCESSES};

/// Resolve the `side` keys of every row from name, product and location.
///
/// Only technosphere rows are accepted; a row in the biosphere database is
/// rejected before any query. The technosphere existence check runs next and
/// its failure is reported as [`ReconcileError::Validation`]. Keys come back
/// in row order.
///
/// # Errors
/// Returns [`ReconcileError::Validation`] when a row is a biosphere flow or
/// has no registry counterpart, [`ReconcileError::LookupMiss`] when a row
/// vanished between the check and the lookup, [`ReconcileError::Ambiguous`]
/// when a row matches several activities, or [`ReconcileError::Gateway`] on
/// registry failure.
pub fn convert_fields_to_key<G: ActivityGateway + ?Sized>(
    gateway: &G,
    table: &ExchangeTable,
    side: Side,
    config: &ReconcileConfig,
) -> Result<Vec<CanonicalKey>, ReconcileError> {
    let endpoints: Vec<&Endpoint> = table.endpoints(side).collect();
    if let Some(index) =
        endpoints.iter().position(|endpoint| endpoint.kind(config) == FlowKind::Biosphere)
    {
        return Err(ReconcileError::Validation(format!(
            "{side} row {index} is a biosphere flow; resolve flows with resolve_flow_keys"
        )));
    }
    if !activities_found(gateway, &endpoints, side, config)? {
        return Err(ReconcileError::Validation(MISSING_PROCESSES.to_string()));
    }
    resolve_process_keys(gateway, &endpoints, side)
}

/// Map each endpoint's `(name, product, location)` to its key, without the
/// existence check.
///
/// A row that names a database only resolves to an activity in that database.
/// A row without one resolves when exactly one activity has its tuple.
///
/// # Errors
/// Returns [`ReconcileError::LookupMiss`], [`ReconcileError::Ambiguous`] or
/// [`ReconcileError::Gateway`].
pub fn resolve_process_keys<G: ActivityGateway + ?Sized>(
    gateway: &G,
    endpoints: &[&Endpoint],
    side: Side,
) -> Result<Vec<CanonicalKey>, ReconcileError> {
    if endpoints.is_empty() {
        return Ok(Vec::new());
    }

    let field_set = FieldSet::select(FlowKind::Technosphere, side);
    let records = gateway.query(&candidate_query(&field_set, endpoints))?;
    let mut candidates: BTreeMap<_, Vec<CanonicalKey>> = BTreeMap::new();
    for record in &records {
        if let Some(tuple) = record.process_match() {
            candidates.entry(tuple).or_default().push(record.key());
        }
    }
    debug!(
        side = %side,
        rows = endpoints.len(),
        candidates = candidates.len(),
        "resolving process keys"
    );

    endpoints
        .iter()
        .enumerate()
        .map(|(index, endpoint)| {
            let found = endpoint
                .process_match()
                .and_then(|tuple| candidates.get(&tuple))
                .map(Vec::as_slice);
            match pick_candidate(found, endpoint.database.as_deref()) {
                Pick::Unique(key) => Ok(key),
                Pick::Missing => Err(ReconcileError::LookupMiss(format!(
                    "{side} row {index}: no activity for {}",
                    describe_process(endpoint)
                ))),
                Pick::Several(count) => Err(ReconcileError::Ambiguous(format!(
                    "{side} row {index}: {count} activities match {}",
                    describe_process(endpoint)
                ))),
            }
        })
        .collect()
}

/// Map each biosphere endpoint's `(name, categories, database)` to its key.
///
/// # Errors
/// Returns [`ReconcileError::LookupMiss`], [`ReconcileError::Ambiguous`] or
/// [`ReconcileError::Gateway`].
pub fn resolve_flow_keys<G: ActivityGateway + ?Sized>(
    gateway: &G,
    endpoints: &[&Endpoint],
    side: Side,
) -> Result<Vec<CanonicalKey>, ReconcileError> {
    if endpoints.is_empty() {
        return Ok(Vec::new());
    }

    let field_set = FieldSet::select(FlowKind::Biosphere, side);
    let records = gateway.query(&candidate_query(&field_set, endpoints))?;
    let mut candidates: BTreeMap<_, Vec<CanonicalKey>> = BTreeMap::new();
    for record in &records {
        if let Some(tuple) = record.flow_match() {
            candidates.entry(tuple).or_default().push(record.key());
        }
    }
    debug!(
        side = %side,
        rows = endpoints.len(),
        candidates = candidates.len(),
        "resolving flow keys"
    );

    endpoints
        .iter()
        .enumerate()
        .map(|(index, endpoint)| {
            let found =
                endpoint.flow_match().and_then(|tuple| candidates.get(&tuple)).map(Vec::as_slice);
            match pick_candidate(found, endpoint.database.as_deref()) {
                Pick::Unique(key) => Ok(key),
                Pick::Missing => Err(ReconcileError::LookupMiss(format!(
                    "{side} row {index}: no flow for {}",
                    describe_flow(endpoint)
                ))),
                Pick::Several(count) => Err(ReconcileError::Ambiguous(format!(
                    "{side} row {index}: {count} flows match {}",
                    describe_flow(endpoint)
                ))),
            }
        })
        .collect()
}

enum Pick {
    Unique(CanonicalKey),
    Missing,
    Several(usize),
}

/// Keep the candidates in the row's database, when it names one.
fn pick_candidate(found: Option<&[CanonicalKey]>, database: Option<&str>) -> Pick {
    let eligible: Vec<&CanonicalKey> = found
        .into_iter()
        .flatten()
        .filter(|key| database.is_none_or(|database| key.database == database))
        .collect();
    match eligible.as_slice() {
        [] => Pick::Missing,
        [key] => Pick::Unique((*key).clone()),
        several => Pick::Several(several.len()),
    }
}

fn describe_process(endpoint: &Endpoint) -> String {
    format!(
        "({}, {}, {}) in {}",
        endpoint.name.as_deref().unwrap_or("<missing>"),
        endpoint.product.as_deref().unwrap_or("<missing>"),
        endpoint.location.as_deref().unwrap_or("<missing>"),
        endpoint.database.as_deref().unwrap_or("<missing>"),
    )
}

fn describe_flow(endpoint: &Endpoint) -> String {
    format!(
        "({}, {}, {})",
        endpoint.name.as_deref().unwrap_or("<missing>"),
        endpoint.categories.as_ref().map_or_else(|| "<missing>".to_string(), ToString::to_string),
        endpoint.database.as_deref().unwrap_or("<missing>"),
    )
}
