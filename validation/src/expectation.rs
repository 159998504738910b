//! Table expectations derived from model types.

use crate::introspect::describe;
use errors::{FixtureError, Result};
use serde::Serialize;
use utils::to_snake_case;

pub const DEFAULT_SCHEMA: &str = "public";

/// A type that mirrors a database table.
///
/// Columns come from the type's serde representation: `#[serde(rename =
/// "...")]` overrides a column name and `#[serde(skip)]` leaves a field out.
///
/// ```
/// use serde::Serialize;
/// use validation::{Model, TableExpectation};
///
/// #[derive(Serialize, Default)]
/// struct Person {
///     id: i64,
///     first_name: String,
///     #[serde(skip)]
///     display_cache: String,
/// }
///
/// impl Model for Person {}
///
/// let expectation = TableExpectation::of(&Person::default()).unwrap();
/// assert_eq!(expectation.table, "person");
/// assert_eq!(expectation.columns, vec!["id", "first_name"]);
/// ```
pub trait Model: Serialize {
    /// Explicit table name, optionally schema-qualified (`"app"."people"`).
    /// `None` derives the table from the type name.
    fn table_name(&self) -> Option<String> {
        None
    }
}

/// Expected shape of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableExpectation {
    /// Name reported in validation errors.
    pub model: String,
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>
}

impl TableExpectation {
    /// Expectation for `table_name`, split into schema and table.
    pub fn new(model: impl Into<String>, table_name: &str) -> Self {
        let (schema, table) = split_table_name(table_name);
        Self {
            model: model.into(),
            schema,
            table,
            columns: Vec::new()
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Derives the expectation from a model value.
    pub fn of<M: Model>(model: &M) -> Result<Self> {
        let shape = describe(model).map_err(|e| FixtureError::InvalidModel {
            reason: e.to_string()
        })?;
        let table_name = model
            .table_name()
            .unwrap_or_else(|| to_snake_case(shape.name));
        Ok(Self::new(shape.name, &table_name).with_columns(shape.fields))
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Splits `schema.table` (either part optionally double-quoted) into its
/// parts, defaulting the schema to `public`.
pub fn split_table_name(name: &str) -> (String, String) {
    let name = name.trim().trim_matches('"');
    match name.split_once('.') {
        Some((schema, table)) => (
            schema.trim_matches('"').to_string(),
            table.trim_matches('"').to_string()
        ),
        None => (DEFAULT_SCHEMA.to_string(), name.to_string())
    }
}
