use std::io::Cursor;

use indexmap::IndexMap;
use tokio::io::AsyncReadExt;

use crate::convert::FromValue;
use crate::io::FluxRead;
use crate::protocol::WireTag;
use crate::values::{read_scalar_body, Value};
use crate::{FluxlineError, Result};

/// A deserialized result set. Storage is column-major: one `Vec<Value>` per
/// column, each exactly `row_count` long. Produced by response decoding and
/// shared read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    status: i8,
    column_names: Vec<String>,
    column_types: Vec<WireTag>,
    name_index: IndexMap<String, usize>,
    rows: usize,
    column_data: Vec<Vec<Value>>,
}

impl Table {
    /// Builds an empty table with the given columns, for assembling results
    /// by hand (primarily in tests and tooling).
    pub fn new(columns: &[(&str, WireTag)]) -> Self {
        let mut name_index = IndexMap::new();
        for (position, (name, _)) in columns.iter().enumerate() {
            name_index.entry(name.to_lowercase()).or_insert(position);
        }
        Table {
            status: 0,
            column_names: columns.iter().map(|(name, _)| name.to_string()).collect(),
            column_types: columns.iter().map(|(_, tag)| *tag).collect(),
            name_index,
            rows: 0,
            column_data: vec![Vec::new(); columns.len()],
        }
    }

    /// Appends one row. Values must match the declared column types
    /// (`Value::Null` is legal anywhere).
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.column_types.len() {
            return Err(FluxlineError::Encoding(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.column_types.len()
            )));
        }
        for (value, tag) in row.iter().zip(&self.column_types) {
            if let Some(value_tag) = value.tag() {
                if value_tag != *tag {
                    return Err(FluxlineError::Encoding(format!(
                        "cannot store {value_tag} value in {tag} column"
                    )));
                }
            }
        }
        for (column, value) in self.column_data.iter_mut().zip(row) {
            column.push(value);
        }
        self.rows += 1;
        Ok(())
    }

    pub fn status(&self) -> i8 {
        self.status
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.column_types.len()
    }

    pub fn has_data(&self) -> bool {
        self.rows > 0
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.name_index.get(&name.to_lowercase()).copied()
    }

    pub fn column_name(&self, column: usize) -> Option<&str> {
        self.column_names.get(column).map(|s| &**s)
    }

    pub fn column_type(&self, column: usize) -> Option<WireTag> {
        self.column_types.get(column).copied()
    }

    /// Borrow a single cell.
    pub fn value(&self, column: usize, row: usize) -> Option<&Value> {
        self.column_data.get(column)?.get(row)
    }

    /// The full column converted to the exact Rust type matching its
    /// declared wire type. Mismatches fail with a cast error.
    pub fn column<T: FromValue>(&self, column: usize) -> Result<Vec<T>> {
        let tag = self
            .column_type(column)
            .ok_or_else(|| FluxlineError::Cast(format!("column index {column} out of range")))?;
        self.column_data[column]
            .iter()
            .map(|value| T::from_value(tag, value.clone()))
            .collect()
    }

    /// A single cell converted to the exact Rust type matching the column's
    /// declared wire type.
    pub fn get<T: FromValue>(&self, column: usize, row: usize) -> Result<T> {
        let tag = self
            .column_type(column)
            .ok_or_else(|| FluxlineError::Cast(format!("column index {column} out of range")))?;
        let value = self
            .value(column, row)
            .ok_or_else(|| FluxlineError::Cast(format!("row index {row} out of range")))?;
        T::from_value(tag, value.clone())
    }

    /// Iterate logical rows as borrowing views; no per-row allocation.
    pub fn iter_rows(&self) -> RowIter<'_> {
        RowIter {
            table: self,
            row: 0,
        }
    }

    pub(crate) async fn read<R: FluxRead>(reader: &mut R) -> Result<Self> {
        let total_length = reader.read_i32().await?;
        if total_length < 0 {
            return Err(FluxlineError::Protocol(format!(
                "impossible table length: {total_length}"
            )));
        }
        let metadata_length = reader.read_i32().await?;
        if metadata_length < 0 {
            return Err(FluxlineError::Protocol(format!(
                "impossible table metadata length: {metadata_length}"
            )));
        }
        let status = reader.read_i8().await?;
        let column_count = reader.read_i16().await?;
        if column_count < 0 {
            return Err(FluxlineError::Protocol(format!(
                "impossible column count: {column_count}"
            )));
        }
        let mut column_types = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let tag = WireTag::from_i8(reader.read_i8().await?)?;
            if tag == WireTag::Array {
                return Err(FluxlineError::Protocol(
                    "ARRAY is not a valid column type".to_string(),
                ));
            }
            column_types.push(tag);
        }
        let mut column_names = Vec::with_capacity(column_count as usize);
        let mut name_index = IndexMap::with_capacity(column_count as usize);
        for position in 0..column_count as usize {
            let name = reader.read_wire_string().await?.ok_or_else(|| {
                FluxlineError::Protocol("null column name in table metadata".to_string())
            })?;
            name_index.entry(name.to_lowercase()).or_insert(position);
            column_names.push(name);
        }
        let row_count = reader.read_i32().await?;
        if row_count < 0 {
            return Err(FluxlineError::Protocol(format!(
                "impossible row count: {row_count}"
            )));
        }

        // Single forward pass over the rows, pivoting into per-column arrays.
        let mut column_data: Vec<Vec<Value>> =
            vec![Vec::with_capacity(row_count as usize); column_count as usize];
        for _ in 0..row_count {
            let row_length = reader.read_i32().await?;
            if row_length < 0 {
                return Err(FluxlineError::Protocol(format!(
                    "impossible row length: {row_length}"
                )));
            }
            let mut row_buf = vec![0u8; row_length as usize];
            reader.read_exact(&mut row_buf[..]).await?;
            let mut row = Cursor::new(row_buf);
            for (tag, column) in column_types.iter().zip(column_data.iter_mut()) {
                column.push(read_scalar_body(*tag, &mut row).await?);
            }
            if (row.position() as usize) < row.get_ref().len() {
                return Err(FluxlineError::Protocol(format!(
                    "row has {} trailing bytes",
                    row.get_ref().len() - row.position() as usize
                )));
            }
        }

        Ok(Table {
            status,
            column_names,
            column_types,
            name_index,
            rows: row_count as usize,
            column_data,
        })
    }
}

pub struct RowIter<'a> {
    table: &'a Table,
    row: usize,
}

impl<'a> Iterator for RowIter<'a> {
    type Item = Row<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.row >= self.table.rows {
            return None;
        }
        let row = Row {
            table: self.table,
            row: self.row,
        };
        self.row += 1;
        Some(row)
    }
}

/// A borrowing view of one logical row; lifetime tied to the owning table.
#[derive(Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    row: usize,
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.row
    }

    pub fn value(&self, column: usize) -> Option<&'a Value> {
        self.table.value(column, self.row)
    }

    pub fn get<T: FromValue>(&self, column: usize) -> Result<T> {
        self.table.get(column, self.row)
    }

    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let column = self
            .table
            .column_index(name)
            .ok_or_else(|| FluxlineError::Cast(format!("no column named {name:?}")))?;
        self.table.get(column, self.row)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::io::FluxWrite;
    use crate::values::{write_scalar_body, Decimal};

    // Test-side encoder for the wire shape of a table; the crate itself only
    // ever decodes tables.
    async fn encode_table(table: &Table) -> Vec<u8> {
        let mut meta = Vec::new();
        meta.write_i8(table.status).await.unwrap();
        meta.write_i16(table.column_count() as i16).await.unwrap();
        for tag in &table.column_types {
            meta.write_i8(*tag as i8).await.unwrap();
        }
        for name in &table.column_names {
            meta.write_wire_string(Some(name)).await.unwrap();
        }

        let mut body = Vec::new();
        body.write_i32(table.row_count() as i32).await.unwrap();
        for row in 0..table.row_count() {
            let mut row_buf = Vec::new();
            for column in 0..table.column_count() {
                write_scalar_body(
                    table.column_types[column],
                    &table.column_data[column][row],
                    &mut row_buf,
                )
                .await
                .unwrap();
            }
            body.write_i32(row_buf.len() as i32).await.unwrap();
            body.write_all(&row_buf).await.unwrap();
        }

        let mut out = Vec::new();
        out.write_i32(4 + meta.len() as i32 + body.len() as i32)
            .await
            .unwrap();
        out.write_i32(meta.len() as i32).await.unwrap();
        out.write_all(&meta).await.unwrap();
        out.write_all(&body).await.unwrap();
        out
    }

    fn sample_table() -> Table {
        let mut table = Table::new(&[
            ("ID", WireTag::Int64),
            ("Name", WireTag::String),
            ("Balance", WireTag::Decimal),
        ]);
        table
            .push_row(vec![
                Value::Int64(1),
                Value::String("ada".into()),
                Value::Decimal(Decimal::from_i64(10)),
            ])
            .unwrap();
        table
            .push_row(vec![Value::Int64(2), Value::Null, Value::Null])
            .unwrap();
        table
    }

    #[tokio::test]
    async fn roundtrip_through_wire_shape() {
        let table = sample_table();
        let encoded = encode_table(&table).await;
        let decoded = Table::read(&mut Cursor::new(encoded)).await.unwrap();
        assert_eq!(decoded, table);
    }

    #[tokio::test]
    async fn empty_table_roundtrip() {
        let table = Table::new(&[("modified_tuples", WireTag::Int64)]);
        let encoded = encode_table(&table).await;
        let decoded = Table::read(&mut Cursor::new(encoded)).await.unwrap();
        assert_eq!(decoded.row_count(), 0);
        assert!(!decoded.has_data());
        assert_eq!(decoded.column_count(), 1);
    }

    #[test]
    fn case_insensitive_lookup() {
        let table = sample_table();
        assert_eq!(table.column_index("name"), Some(1));
        assert_eq!(table.column_index("NAME"), Some(1));
        assert_eq!(table.column_index("missing"), None);
    }

    #[test]
    fn typed_access() {
        let table = sample_table();
        assert_eq!(table.column::<i64>(0).unwrap(), vec![1, 2]);
        assert_eq!(
            table.column::<Option<String>>(1).unwrap(),
            vec![Some("ada".to_string()), None]
        );
        // non-nullable accessor over a column containing a null
        assert!(table.column::<String>(1).is_err());
        // wrong type entirely
        assert!(table.column::<i32>(0).is_err());
        assert_eq!(table.get::<i64>(0, 1).unwrap(), 2);
        assert!(table.get::<i64>(0, 2).is_err());
    }

    #[test]
    fn row_iteration() {
        let table = sample_table();
        let names: Vec<Option<String>> = table
            .iter_rows()
            .map(|row| row.get_by_name("name").unwrap())
            .collect();
        assert_eq!(names, vec![Some("ada".to_string()), None]);
        assert_eq!(table.iter_rows().count(), 2);
    }

    #[tokio::test]
    async fn rejects_unknown_column_tag() {
        let mut buf = Vec::new();
        buf.write_i32(100).await.unwrap();
        buf.write_i32(4).await.unwrap();
        buf.write_i8(0).await.unwrap();
        buf.write_i16(1).await.unwrap();
        buf.write_i8(77).await.unwrap(); // not a valid tag
        let err = Table::read(&mut Cursor::new(buf)).await.unwrap_err();
        assert!(matches!(err, FluxlineError::Protocol(_)));
    }
}
