//! Hand-off of a materialized collection to a tabular sink.
//!
//! The sink receives a schema and row-major values.  When no schema is given it
//! is inferred from the records, which must then all have the same fields with a
//! consistent kind per column.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BagError, SchemaInferenceError};

/// Elements which can be viewed as a flat record of named values
pub trait Record {
    /// Fields of the record in column order, or `None` if the element is not
    /// record shaped.
    fn fields(&self) -> Option<Vec<(String, Value)>>;
}

impl Record for Value {
    fn fields(&self) -> Option<Vec<(String, Value)>> {
        match self {
            Value::Object(m) => Some(m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            _ => None
        }
    }
}

impl Record for BTreeMap<String, Value> {
    fn fields(&self) -> Option<Vec<(String, Value)>> {
        Some(self.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl Record for HashMap<String, Value> {
    fn fields(&self) -> Option<Vec<(String, Value)>> {
        let mut fs: Vec<_> = self.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        fs.sort_by(|a, b| a.0.cmp(&b.0));
        Some(fs)
    }
}

/// Kind of values held by a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ColumnKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    /// Arrays and objects
    Nested,
}

impl ColumnKind {
    /// Kind of a single value
    pub fn of(v: &Value) -> Self {
        match v {
            Value::Null => ColumnKind::Null,
            Value::Bool(_) => ColumnKind::Bool,
            Value::Number(n) if n.is_f64() => ColumnKind::Float,
            Value::Number(_) => ColumnKind::Int,
            Value::String(_) => ColumnKind::Str,
            Value::Array(_) | Value::Object(_) => ColumnKind::Nested,
        }
    }

    // Null unifies with anything, Int widens to Float.
    fn unify(self, other: ColumnKind) -> Option<ColumnKind> {
        use self::ColumnKind::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Null, b) => Some(b),
            (a, Null) => Some(a),
            (Int, Float) | (Float, Int) => Some(Float),
            _ => None
        }
    }
}

/// Named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    /// Creates a column
    pub fn new(name: &str, kind: ColumnKind) -> Self {
        Column { name: name.to_owned(), kind }
    }
}

/// Ordered set of columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Columns in table order
    pub columns: Vec<Column>,
}

impl Schema {
    /// Creates a schema from columns in table order
    pub fn new(columns: Vec<Column>) -> Self {
        Schema { columns }
    }

    /// Column names, in order
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Index of the named column
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

fn not_a_record(row: usize) -> SchemaInferenceError {
    SchemaInferenceError { row, reason: "element is not a record".into() }
}

/// Infers the schema shared by every record.
pub fn infer_schema<R: Record>(records: &[R]) -> Result<Schema, SchemaInferenceError> {
    let mut iter = records.iter().enumerate();
    let mut schema = match iter.next() {
        None => return Ok(Schema::default()),
        Some((row, r)) => {
            let fields = r.fields().ok_or_else(|| not_a_record(row))?;
            Schema::new(fields.iter().map(|(k, v)| Column::new(k, ColumnKind::of(v))).collect())
        }
    };

    for (row, r) in iter {
        let fields = r.fields().ok_or_else(|| not_a_record(row))?;
        if fields.len() != schema.columns.len() {
            return Err(SchemaInferenceError {
                row,
                reason: format!("expected fields {:?}, found {:?}", schema.names(),
                                fields.iter().map(|f| &f.0).collect::<Vec<_>>())
            });
        }
        for (name, v) in fields.iter() {
            let pos = schema.position(name).ok_or_else(|| SchemaInferenceError {
                row,
                reason: format!("unexpected field `{}`", name)
            })?;
            let col = &mut schema.columns[pos];
            let kind = ColumnKind::of(v);
            col.kind = col.kind.unify(kind).ok_or_else(|| SchemaInferenceError {
                row,
                reason: format!("column `{}` holds {:?} values, found {:?}", col.name, col.kind, kind)
            })?;
        }
    }
    Ok(schema)
}

/// Lays the records out as rows following `schema`; absent fields become `Null`.
pub fn project<R: Record>(records: &[R], schema: &Schema) -> Result<Vec<Vec<Value>>, SchemaInferenceError> {
    records.iter().enumerate().map(|(row, r)| {
        let mut fields: HashMap<String, Value> = r.fields()
            .ok_or_else(|| not_a_record(row))?
            .into_iter()
            .collect();
        Ok(schema.columns.iter()
            .map(|c| fields.remove(&c.name).unwrap_or(Value::Null))
            .collect())
    }).collect()
}

/// Receiver of a fully materialized, flattened collection
pub trait TabularSink {
    /// Handle returned to the caller
    type Output;

    /// Consumes the rows, laid out according to `schema`.
    fn accept(&mut self, schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self::Output, BagError>;
}

/// Row-major table kept in memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Layout of every row
    pub schema: Schema,
    /// Values, row-major
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Values of a single column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let pos = self.schema.position(name)?;
        Some(self.rows.iter().filter_map(|r| r.get(pos)).collect())
    }
}

/// Sink producing a `Table`
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryTable;

impl TabularSink for MemoryTable {
    type Output = Table;

    fn accept(&mut self, schema: Schema, rows: Vec<Vec<Value>>) -> Result<Table, BagError> {
        Ok(Table { schema, rows })
    }
}

#[cfg(test)]
mod schema_test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_schema() {
        let records = vec![
            json!({"name": "Alice", "age": 31, "score": null}),
            json!({"name": "Bob", "age": 40, "score": 2.5}),
        ];
        let schema = infer_schema(&records).unwrap();
        assert_eq!(schema.names(), vec!["age", "name", "score"]);
        assert_eq!(schema.columns[0].kind, ColumnKind::Int);
        assert_eq!(schema.columns[2].kind, ColumnKind::Float);
    }

    #[test]
    fn test_int_widens_to_float() {
        let records = vec![json!({"x": 1}), json!({"x": 1.5})];
        assert_eq!(infer_schema(&records).unwrap().columns[0].kind, ColumnKind::Float);
    }

    #[test]
    fn test_inconsistent_fields() {
        let records = vec![json!({"x": 1}), json!({"y": 1})];
        let err = infer_schema(&records).unwrap_err();
        assert_eq!(err.row, 1);

        let records = vec![json!({"x": 1}), json!({"x": 1, "y": 2})];
        assert_eq!(infer_schema(&records).unwrap_err().row, 1);
    }

    #[test]
    fn test_inconsistent_kinds() {
        let records = vec![json!({"x": 1}), json!({"x": "one"})];
        assert!(infer_schema(&records).unwrap_err().reason.contains("column `x`"));
    }

    #[test]
    fn test_not_a_record() {
        let records = vec![json!({"x": 1}), json!([1, 2])];
        assert_eq!(infer_schema(&records).unwrap_err(), not_a_record(1));
    }

    #[test]
    fn test_project_fills_nulls() {
        let records = vec![json!({"x": 1}), json!({"y": "b"})];
        let schema = Schema::new(vec![Column::new("y", ColumnKind::Str), Column::new("x", ColumnKind::Int)]);
        let rows = project(&records, &schema).unwrap();
        assert_eq!(rows, vec![vec![Value::Null, json!(1)], vec![json!("b"), Value::Null]]);
    }
}
