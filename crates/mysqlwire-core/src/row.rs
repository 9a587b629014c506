//! Result rows.

use std::collections::HashMap;
use std::sync::Arc;

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::{FromValue, Value};

/// Column names shared by every row of one resultset.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let mut name_to_index = HashMap::with_capacity(names.len());
        // First occurrence wins for duplicated labels (`SELECT a, a`).
        for (i, name) in names.iter().enumerate() {
            name_to_index.entry(name.clone()).or_insert(i);
        }
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One row of a resultset: exactly `field_count` values in column order.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a typed value by column index.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.get(index).ok_or_else(|| out_of_bounds(index, self.len()))?;
        value.try_get::<T>().map_err(|e| self.with_column(e, index))
    }

    /// Get a typed value by column index, mapping NULL to `None`.
    pub fn get_opt<T: FromValue>(&self, index: usize) -> Result<Option<T>> {
        match self.get(index) {
            None => Err(out_of_bounds(index, self.len())),
            Some(Value::Null) => Ok(None),
            Some(value) => value
                .try_get::<T>()
                .map(Some)
                .map_err(|e| self.with_column(e, index)),
        }
    }

    /// Get a typed value by column name.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self.columns.index_of(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: T::KIND.name(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        self.get_as(index)
    }

    fn with_column(&self, err: Error, index: usize) -> Error {
        match err {
            Error::Type(mut te) => {
                te.column = self.columns.names().get(index).cloned();
                Error::Type(te)
            }
            e => e,
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

fn out_of_bounds(index: usize, len: usize) -> Error {
    Error::Type(TypeError {
        expected: "column",
        actual: format!("index {} out of bounds (row has {} columns)", index, len),
        column: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(names: &[&str], values: Vec<Value>) -> Row {
        let columns = Arc::new(ColumnInfo::new(
            names.iter().map(|n| (*n).to_string()).collect(),
        ));
        Row::with_columns(columns, values)
    }

    #[test]
    fn test_row_basic_access() {
        let row = row(
            &["id", "name"],
            vec![Value::Int64(1), Value::String("Alice".to_string())],
        );

        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int64(1)));
        assert_eq!(row.get(2), None);
        assert_eq!(
            row.get_by_name("name"),
            Some(&Value::String("Alice".to_string()))
        );
        assert_eq!(row.get_by_name("missing"), None);
    }

    #[test]
    fn test_row_typed_access() {
        let row = row(&["id", "n"], vec![Value::Int64(42), Value::UInt64(7)]);

        assert_eq!(row.get_as::<i64>(0).unwrap(), 42);
        assert_eq!(row.get_as::<u64>(0).unwrap(), 42);
        assert_eq!(row.get_named::<i64>("n").unwrap(), 7);
    }

    #[test]
    fn test_row_type_errors() {
        let row = row(&["id"], vec![Value::String("x".to_string())]);

        match row.get_as::<i64>(0) {
            Err(Error::Type(te)) => assert_eq!(te.column.as_deref(), Some("id")),
            other => panic!("Expected type error, got {other:?}"),
        }
        assert!(row.get_named::<i64>("missing").is_err());
        assert!(row.get_as::<i64>(99).is_err());
    }

    #[test]
    fn test_row_null_handling() {
        let row = row(&["a"], vec![Value::Null]);
        assert_eq!(row.get_opt::<i64>(0).unwrap(), None);
        assert!(row.get_as::<i64>(0).is_err());
    }

    #[test]
    fn test_duplicate_column_names() {
        let row = row(&["a", "a"], vec![Value::Int64(1), Value::Int64(2)]);
        assert_eq!(row.get_by_name("a"), Some(&Value::Int64(1)));
        assert_eq!(row.into_values(), vec![Value::Int64(1), Value::Int64(2)]);
    }
}
