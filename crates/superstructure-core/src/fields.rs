//! Static field groups selecting which columns take part in a match.
//!
//! Every group starts with the activity name and the `from`/`to` variants of a
//! group share length and field order, so callers may walk them in lockstep.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::gateway::Dimension;
use crate::{FlowKind, Side};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Product,
    Location,
    Categories,
    Database,
    Key,
}

impl Field {
    /// Column label without the side prefix.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "activity name",
            Self::Product => "reference product",
            Self::Location => "location",
            Self::Categories => "categories",
            Self::Database => "database",
            Self::Key => "key",
        }
    }

    #[must_use]
    pub fn parse_label(value: &str) -> Option<Self> {
        match value {
            "activity name" => Some(Self::Name),
            "reference product" => Some(Self::Product),
            "location" => Some(Self::Location),
            "categories" => Some(Self::Categories),
            "database" => Some(Self::Database),
            "key" => Some(Self::Key),
            _ => None,
        }
    }

    /// Registry dimension a set of this field's values can constrain.
    ///
    /// Categories live in the record payload and keys span two dimensions, so
    /// neither maps onto a single registry column.
    #[must_use]
    pub fn query_dimension(self) -> Option<Dimension> {
        match self {
            Self::Name => Some(Dimension::Name),
            Self::Product => Some(Dimension::Product),
            Self::Location => Some(Dimension::Location),
            Self::Database => Some(Dimension::Database),
            Self::Categories | Self::Key => None,
        }
    }
}

pub const TECHNOSPHERE_FIELDS: [Field; 4] =
    [Field::Name, Field::Product, Field::Location, Field::Database];
pub const BIOSPHERE_FIELDS: [Field; 3] = [Field::Name, Field::Categories, Field::Database];
pub const ENDPOINT_FIELDS: [Field; 6] =
    [Field::Name, Field::Product, Field::Location, Field::Categories, Field::Database, Field::Key];

/// A named exchange table column such as `from activity name`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Column {
    pub side: Side,
    pub field: Field,
}

impl Column {
    #[must_use]
    pub const fn new(side: Side, field: Field) -> Self {
        Self { side, field }
    }

    #[must_use]
    pub fn name(self) -> String {
        format!("{} {}", self.side.as_str(), self.field.label())
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (side, label) = value.split_once(' ')?;
        Some(Self { side: Side::parse(side)?, field: Field::parse_label(label)? })
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.side.as_str(), self.field.label())
    }
}

/// One of the four match groups: flow kind crossed with endpoint side.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FieldSet {
    pub kind: FlowKind,
    pub side: Side,
    pub fields: &'static [Field],
}

pub const TECHNOSPHERE_FROM: FieldSet =
    FieldSet { kind: FlowKind::Technosphere, side: Side::From, fields: &TECHNOSPHERE_FIELDS };
pub const TECHNOSPHERE_TO: FieldSet =
    FieldSet { kind: FlowKind::Technosphere, side: Side::To, fields: &TECHNOSPHERE_FIELDS };
pub const BIOSPHERE_FROM: FieldSet =
    FieldSet { kind: FlowKind::Biosphere, side: Side::From, fields: &BIOSPHERE_FIELDS };
pub const BIOSPHERE_TO: FieldSet =
    FieldSet { kind: FlowKind::Biosphere, side: Side::To, fields: &BIOSPHERE_FIELDS };

impl FieldSet {
    #[must_use]
    pub const fn select(kind: FlowKind, side: Side) -> Self {
        match (kind, side) {
            (FlowKind::Technosphere, Side::From) => TECHNOSPHERE_FROM,
            (FlowKind::Technosphere, Side::To) => TECHNOSPHERE_TO,
            (FlowKind::Biosphere, Side::From) => BIOSPHERE_FROM,
            (FlowKind::Biosphere, Side::To) => BIOSPHERE_TO,
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = Column> + '_ {
        self.fields.iter().map(|field| Column::new(self.side, *field))
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns().map(Column::name).collect()
    }

    /// Registry dimensions this group constrains when querying candidates.
    pub fn query_dimensions(&self) -> impl Iterator<Item = (Field, Dimension)> + '_ {
        self.fields.iter().filter_map(|field| field.query_dimension().map(|dim| (*field, dim)))
    }
}

/// Every column belonging to one side of the exchange.
#[must_use]
pub fn side_columns(side: Side) -> Vec<Column> {
    ENDPOINT_FIELDS.iter().map(|field| Column::new(side, *field)).collect()
}
