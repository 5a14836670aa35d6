//! Batch completion over both endpoints of an exchange table.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::expand::expand_side;
use crate::gateway::ActivityGateway;
use crate::resolve::{resolve_flow_keys, resolve_process_keys};
use crate::table::{Endpoint, ExchangeTable};
use crate::validate::{activities_found, flows_found};
use crate::{
    CanonicalKey, FlowKind, ReconcileConfig, ReconcileError, Side, MISSING_FLOWS, MISSING_KEYS,
    MISSING_PROCESSES,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SideReport {
    pub resolved_process_keys: usize,
    pub resolved_flow_keys: usize,
    pub expanded_rows: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionReport {
    pub rows: usize,
    pub from: SideReport,
    pub to: SideReport,
}

impl CompletionReport {
    fn side_mut(&mut self, side: Side) -> &mut SideReport {
        match side {
            Side::From => &mut self.from,
            Side::To => &mut self.to,
        }
    }
}

/// Fill every descriptive field from the `from` and `to` keys.
///
/// Both sides are expanded before any row is touched, so a failure leaves the
/// table unchanged.
///
/// # Errors
/// Returns [`ReconcileError::Precondition`] when any key is missing,
/// [`ReconcileError::LookupMiss`] when a key is unknown to the registry, or
/// [`ReconcileError::Gateway`].
pub fn fill_out_with_keys<G: ActivityGateway + ?Sized>(
    gateway: &G,
    table: &mut ExchangeTable,
) -> Result<(), ReconcileError> {
    if !Side::ALL.iter().all(|side| table.keys_known(*side)) {
        return Err(ReconcileError::Precondition(MISSING_KEYS.to_string()));
    }

    let from_fields = expand_side(gateway, table, Side::From)?;
    let to_fields = expand_side(gateway, table, Side::To)?;

    for (side, fields) in [(Side::From, from_fields), (Side::To, to_fields)] {
        for (index, fields) in fields.iter().enumerate() {
            if let Some(endpoint) = table.endpoint_mut(index, side) {
                endpoint.apply_fields(fields);
            }
        }
    }
    Ok(())
}

/// Resolve every missing key from the row's descriptive fields.
///
/// Rows in the biosphere database resolve as flows, all others as processes.
/// Each group is checked for existence first. Keys are assigned only once
/// both sides have resolved.
///
/// # Errors
/// Returns [`ReconcileError::Validation`] naming missing processes or missing
/// flows, or any error of the key resolvers.
pub fn fill_out_with_fields<G: ActivityGateway + ?Sized>(
    gateway: &G,
    table: &mut ExchangeTable,
    config: &ReconcileConfig,
) -> Result<CompletionReport, ReconcileError> {
    let mut report = CompletionReport { rows: table.len(), ..CompletionReport::default() };
    let mut assignments: Vec<(usize, Side, CanonicalKey)> = Vec::new();

    for side in Side::ALL {
        let pending = table.rows_missing_key(side);
        let (processes, flows): (Vec<usize>, Vec<usize>) =
            pending.into_iter().partition(|index| {
                table.rows()[*index].endpoint(side).kind(config) == FlowKind::Technosphere
            });

        let process_endpoints = endpoints_at(table, &processes, side);
        if !activities_found(gateway, &process_endpoints, side, config)? {
            return Err(ReconcileError::Validation(format!("{MISSING_PROCESSES} ({side} side)")));
        }
        let flow_endpoints = endpoints_at(table, &flows, side);
        if !flows_found(gateway, &flow_endpoints, side, config)? {
            return Err(ReconcileError::Validation(format!("{MISSING_FLOWS} ({side} side)")));
        }

        let process_keys = resolve_process_keys(gateway, &process_endpoints, side)?;
        let flow_keys = resolve_flow_keys(gateway, &flow_endpoints, side)?;

        let side_report = report.side_mut(side);
        side_report.resolved_process_keys = process_keys.len();
        side_report.resolved_flow_keys = flow_keys.len();

        assignments.extend(
            processes.into_iter().zip(process_keys).map(|(index, key)| (index, side, key)),
        );
        assignments
            .extend(flows.into_iter().zip(flow_keys).map(|(index, key)| (index, side, key)));
    }

    for (index, side, key) in assignments {
        if let Some(endpoint) = table.endpoint_mut(index, side) {
            endpoint.key = Some(key);
        }
    }
    Ok(report)
}

/// Bring every row to a state where both keys and descriptive fields are set.
///
/// Missing keys are resolved from fields, then all fields are rewritten from
/// the registry so both representations agree.
///
/// # Errors
/// Returns the errors of [`fill_out_with_fields`] and [`fill_out_with_keys`].
/// On error the table is left as it was.
pub fn complete_batch<G: ActivityGateway + ?Sized>(
    gateway: &G,
    table: &mut ExchangeTable,
    config: &ReconcileConfig,
) -> Result<CompletionReport, ReconcileError> {
    let mut working = table.clone();
    let mut report = fill_out_with_fields(gateway, &mut working, config)?;
    fill_out_with_keys(gateway, &mut working)?;
    report.from.expanded_rows = working.len();
    report.to.expanded_rows = working.len();
    *table = working;

    info!(
        rows = report.rows,
        from_process_keys = report.from.resolved_process_keys,
        from_flow_keys = report.from.resolved_flow_keys,
        to_process_keys = report.to.resolved_process_keys,
        to_flow_keys = report.to.resolved_flow_keys,
        "completed superstructure batch"
    );
    Ok(report)
}

fn endpoints_at<'a>(table: &'a ExchangeTable, indexes: &[usize], side: Side) -> Vec<&'a Endpoint> {
    indexes
        .iter()
        .filter_map(|index| table.rows().get(*index))
        .map(|row| row.endpoint(side))
        .collect()
}
