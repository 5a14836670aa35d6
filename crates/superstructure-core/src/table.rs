//! The superstructure exchange table: ordered rows with named columns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::expand::EndpointFields;
use crate::fields::{Column, Field};
use crate::{CanonicalKey, Categories, FlowKind, ReconcileConfig, Side};

/// `(name, product, location)` lookup tuple for technosphere activities.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcessMatch<'a> {
    pub name: &'a str,
    pub product: &'a str,
    pub location: &'a str,
}

/// `(name, categories, database)` lookup tuple for biosphere flows.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FlowMatch<'a> {
    pub name: &'a str,
    pub categories: &'a Categories,
    pub database: &'a str,
}

/// Borrowed value of one table cell.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue<'a> {
    Text(&'a str),
    Categories(&'a Categories),
    Key(&'a CanonicalKey),
}

/// Descriptive fields and key of one side of an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub name: Option<String>,
    pub product: Option<String>,
    pub location: Option<String>,
    pub categories: Option<Categories>,
    pub database: Option<String>,
    pub key: Option<CanonicalKey>,
}

impl Endpoint {
    #[must_use]
    pub fn text(&self, field: Field) -> Option<&str> {
        match field {
            Field::Name => self.name.as_deref(),
            Field::Product => self.product.as_deref(),
            Field::Location => self.location.as_deref(),
            Field::Database => self.database.as_deref(),
            Field::Categories | Field::Key => None,
        }
    }

    #[must_use]
    pub fn cell(&self, field: Field) -> Option<CellValue<'_>> {
        match field {
            Field::Categories => self.categories.as_ref().map(CellValue::Categories),
            Field::Key => self.key.as_ref().map(CellValue::Key),
            _ => self.text(field).map(CellValue::Text),
        }
    }

    #[must_use]
    pub fn kind(&self, config: &ReconcileConfig) -> FlowKind {
        FlowKind::classify(self.database.as_deref(), config)
    }

    #[must_use]
    pub fn process_match(&self) -> Option<ProcessMatch<'_>> {
        Some(ProcessMatch {
            name: self.name.as_deref()?,
            product: self.product.as_deref()?,
            location: self.location.as_deref()?,
        })
    }

    #[must_use]
    pub fn flow_match(&self) -> Option<FlowMatch<'_>> {
        Some(FlowMatch {
            name: self.name.as_deref()?,
            categories: self.categories.as_ref()?,
            database: self.database.as_deref()?,
        })
    }

    /// Overwrite the descriptive fields with values expanded from the registry.
    pub fn apply_fields(&mut self, fields: &EndpointFields) {
        self.name = Some(fields.name.clone());
        self.product.clone_from(&fields.product);
        self.location.clone_from(&fields.location);
        self.categories.clone_from(&fields.categories);
        self.database = Some(fields.database.clone());
    }

    fn clear_missing(&mut self, config: &ReconcileConfig) {
        for slot in [&mut self.name, &mut self.product, &mut self.location, &mut self.database] {
            if slot.as_deref().is_some_and(|value| config.is_missing_marker(value)) {
                *slot = None;
            }
        }
        if self.categories.as_ref().is_some_and(|categories| {
            categories.is_empty() || categories.0.iter().all(|part| config.is_missing_marker(part))
        }) {
            self.categories = None;
        }
    }
}

/// One superstructure row. Columns outside the reconciliation schema, such as
/// scenario amounts, are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ExchangeRow", into = "ExchangeRow")]
pub struct ExchangeRecord {
    pub from: Endpoint,
    pub to: Endpoint,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ExchangeRecord {
    #[must_use]
    pub fn new(from: Endpoint, to: Endpoint) -> Self {
        Self { from, to, extra: BTreeMap::new() }
    }

    #[must_use]
    pub fn endpoint(&self, side: Side) -> &Endpoint {
        match side {
            Side::From => &self.from,
            Side::To => &self.to,
        }
    }

    pub fn endpoint_mut(&mut self, side: Side) -> &mut Endpoint {
        match side {
            Side::From => &mut self.from,
            Side::To => &mut self.to,
        }
    }

    #[must_use]
    pub fn get(&self, column: Column) -> Option<CellValue<'_>> {
        self.endpoint(column.side).cell(column.field)
    }
}

#[derive(Serialize, Deserialize)]
struct ExchangeRow {
    #[serde(rename = "from activity name", default)]
    from_name: Option<String>,
    #[serde(rename = "from reference product", default)]
    from_product: Option<String>,
    #[serde(rename = "from location", default)]
    from_location: Option<String>,
    #[serde(rename = "from categories", default)]
    from_categories: Option<Categories>,
    #[serde(rename = "from database", default)]
    from_database: Option<String>,
    #[serde(rename = "from key", default)]
    from_key: Option<CanonicalKey>,
    #[serde(rename = "to activity name", default)]
    to_name: Option<String>,
    #[serde(rename = "to reference product", default)]
    to_product: Option<String>,
    #[serde(rename = "to location", default)]
    to_location: Option<String>,
    #[serde(rename = "to categories", default)]
    to_categories: Option<Categories>,
    #[serde(rename = "to database", default)]
    to_database: Option<String>,
    #[serde(rename = "to key", default)]
    to_key: Option<CanonicalKey>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl From<ExchangeRow> for ExchangeRecord {
    fn from(row: ExchangeRow) -> Self {
        Self {
            from: Endpoint {
                name: row.from_name,
                product: row.from_product,
                location: row.from_location,
                categories: row.from_categories,
                database: row.from_database,
                key: row.from_key,
            },
            to: Endpoint {
                name: row.to_name,
                product: row.to_product,
                location: row.to_location,
                categories: row.to_categories,
                database: row.to_database,
                key: row.to_key,
            },
            extra: row.extra,
        }
    }
}

impl From<ExchangeRecord> for ExchangeRow {
    fn from(record: ExchangeRecord) -> Self {
        let ExchangeRecord { from, to, extra } = record;
        Self {
            from_name: from.name,
            from_product: from.product,
            from_location: from.location,
            from_categories: from.categories,
            from_database: from.database,
            from_key: from.key,
            to_name: to.name,
            to_product: to.product,
            to_location: to.location,
            to_categories: to.categories,
            to_database: to.database,
            to_key: to.key,
            extra,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeTable {
    rows: Vec<ExchangeRecord>,
}

impl From<Vec<ExchangeRecord>> for ExchangeTable {
    fn from(rows: Vec<ExchangeRecord>) -> Self {
        Self { rows }
    }
}

impl ExchangeTable {
    #[must_use]
    pub fn new(rows: Vec<ExchangeRecord>) -> Self {
        Self { rows }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn rows(&self) -> &[ExchangeRecord] {
        &self.rows
    }

    pub fn endpoints(&self, side: Side) -> impl Iterator<Item = &Endpoint> {
        self.rows.iter().map(move |row| row.endpoint(side))
    }

    pub(crate) fn endpoint_mut(&mut self, index: usize, side: Side) -> Option<&mut Endpoint> {
        self.rows.get_mut(index).map(|row| row.endpoint_mut(side))
    }

    /// Values of one named column, in row order.
    #[must_use]
    pub fn column(&self, column: Column) -> Vec<Option<CellValue<'_>>> {
        self.rows.iter().map(|row| row.get(column)).collect()
    }

    #[must_use]
    pub fn keys_known(&self, side: Side) -> bool {
        self.endpoints(side).all(|endpoint| endpoint.key.is_some())
    }

    /// Row indexes whose `side` key is not set.
    #[must_use]
    pub fn rows_missing_key(&self, side: Side) -> Vec<usize> {
        self.endpoints(side)
            .enumerate()
            .filter_map(|(index, endpoint)| endpoint.key.is_none().then_some(index))
            .collect()
    }

    /// Replace configured missing markers with real absences.
    pub fn normalize_missing(&mut self, config: &ReconcileConfig) {
        for row in &mut self.rows {
            row.from.clear_missing(config);
            row.to.clear_missing(config);
        }
    }
}
