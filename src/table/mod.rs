//! In-memory column-oriented table (§4.B).
//!
//! Rows land column-wise so a single-column scan never touches data for
//! other columns. Each column tracks its own stored length, which can
//! trail the table's logical row count `n` — missing tail entries are
//! materialized as `Undefined` lazily, on read.

pub mod encoding;

use indexmap::IndexMap;

use crate::wire::Value;

/// The stored type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Int,
    Fixed,
    Float,
    Boolean,
    Json,
}

/// Static description of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub kind: ColumnKind,
    /// Fractional digits, only meaningful for `Fixed`.
    pub precision: Option<u32>,
    /// Opaque compression tag, carried through export/import but not
    /// interpreted by the in-memory store.
    pub compression: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self { name: name.into(), kind, precision: None, compression: None }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Behavior when `add_record` is given a row missing a declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissingColumn {
    /// Append an undefined sentinel (the default).
    Undefined,
    /// Reject the whole record.
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("record is missing required column {0}")]
    MissingColumn(String),
    #[error("column {0} not found")]
    UnknownColumn(String),
}

/// One column's append-only value buffer, stored pre-encoded so cursors
/// never re-encode on read.
#[derive(Debug, Clone, Default)]
struct ColumnBuffer {
    values: Vec<Value>,
}

/// A column-oriented, in-memory table.
pub struct Table {
    columns: Vec<ColumnDescriptor>,
    buffers: Vec<ColumnBuffer>,
    row_count: usize,
}

/// A frozen, serializable snapshot of a table's contents, suitable for
/// `export`/`import` round trips across process or actor boundaries.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
}

impl Table {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        let buffers = columns.iter().map(|_| ColumnBuffer::default()).collect();
        Self { columns, buffers, row_count: 0 }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Read a dotted key path out of `row`, descending into nested maps up
    /// to `recursion_level` levels.
    fn extract(row: &IndexMap<String, Value>, path: &str, recursion_level: u32) -> Option<Value> {
        let mut segments = path.splitn(recursion_level.max(1) as usize + 1, '.');
        let first = segments.next()?;
        let mut current = row.get(first)?.clone();
        for seg in segments {
            match current {
                Value::Map(ref m) => {
                    current = m.get(seg)?.clone();
                }
                _ => return None,
            }
        }
        Some(current)
    }

    /// Append one row. `row` is a mapping from (dotted, for nested access)
    /// key paths to values; columns absent from `row` get `Value::Undefined`
    /// unless `on_missing` is `Error`.
    pub fn add_record(
        &mut self,
        row: &IndexMap<String, Value>,
        on_missing: OnMissingColumn,
        recursion_level: u32,
    ) -> Result<(), TableError> {
        for (idx, col) in self.columns.iter().enumerate() {
            let value = Self::extract(row, &col.name, recursion_level);
            match value {
                Some(v) => self.buffers[idx].values.push(v),
                None => match on_missing {
                    OnMissingColumn::Undefined => self.buffers[idx].values.push(Value::Undefined),
                    OnMissingColumn::Error => {
                        return Err(TableError::MissingColumn(col.name.clone()));
                    }
                },
            }
        }
        self.row_count += 1;
        Ok(())
    }

    /// A lazy, finite cursor over one column's `n` logical values
    /// (row_count at call time), starting after `skip` entries.
    pub fn get_cursor(&self, column: &str, skip: usize) -> Result<ColumnCursor<'_>, TableError> {
        let idx = self.column_index(column).ok_or_else(|| TableError::UnknownColumn(column.to_string()))?;
        Ok(ColumnCursor { buffer: &self.buffers[idx], total: self.row_count, pos: skip })
    }

    /// A multi-column cursor: pulls from the first column, and when
    /// `filter` rejects that value, advances every other column's cursor
    /// in lockstep without materializing the row. When accepted, yields
    /// the full row across all requested columns.
    pub fn get_multi_cursor<'a>(
        &'a self,
        columns: &[&str],
        filter: Option<Box<dyn Fn(&Value) -> bool + 'a>>,
    ) -> Result<MultiCursor<'a>, TableError> {
        let idxs: Result<Vec<usize>, TableError> = columns
            .iter()
            .map(|c| self.column_index(c).ok_or_else(|| TableError::UnknownColumn(c.to_string())))
            .collect();
        let idxs = idxs?;
        Ok(MultiCursor { table: self, idxs, filter, pos: 0 })
    }

    /// Freeze the table into a serializable snapshot.
    pub fn export(&self) -> TableSnapshot {
        let mut rows = Vec::with_capacity(self.row_count);
        for row_idx in 0..self.row_count {
            let mut row = Vec::with_capacity(self.columns.len());
            for buf in &self.buffers {
                row.push(buf.values.get(row_idx).cloned().unwrap_or(Value::Undefined));
            }
            rows.push(row);
        }
        TableSnapshot { columns: self.columns.clone(), rows, row_count: self.row_count }
    }

    /// Append another snapshot's rows onto this table. Columns present in
    /// one side only materialize as `Undefined` on the other.
    pub fn import(&mut self, snapshot: &TableSnapshot) {
        for incoming in &snapshot.columns {
            if self.column_index(&incoming.name).is_none() {
                self.columns.push(incoming.clone());
                self.buffers.push(ColumnBuffer { values: vec![Value::Undefined; self.row_count] });
            }
        }
        for row in &snapshot.rows {
            for (idx, col) in self.columns.iter().enumerate() {
                let src_idx = snapshot.columns.iter().position(|c| c.name == col.name);
                let value = src_idx.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Undefined);
                self.buffers[idx].values.push(value);
            }
            self.row_count += 1;
        }
    }
}

/// A lazy, finite cursor over a single column.
pub struct ColumnCursor<'a> {
    buffer: &'a ColumnBuffer,
    total: usize,
    pos: usize,
}

impl<'a> Iterator for ColumnCursor<'a> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        if self.pos >= self.total {
            return None;
        }
        let v = self.buffer.values.get(self.pos).cloned().unwrap_or(Value::Undefined);
        self.pos += 1;
        Some(v)
    }
}

/// A lazy cursor across several columns, filter-aware on the first.
pub struct MultiCursor<'a> {
    table: &'a Table,
    idxs: Vec<usize>,
    filter: Option<Box<dyn Fn(&Value) -> bool + 'a>>,
    pos: usize,
}

impl<'a> Iterator for MultiCursor<'a> {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Vec<Value>> {
        while self.pos < self.table.row_count {
            let first_idx = self.idxs[0];
            let first = self.table.buffers[first_idx].values.get(self.pos).cloned().unwrap_or(Value::Undefined);
            let accept = self.filter.as_ref().map(|f| f(&first)).unwrap_or(true);
            if !accept {
                self.pos += 1;
                continue;
            }
            let row = self
                .idxs
                .iter()
                .map(|&i| self.table.buffers[i].values.get(self.pos).cloned().unwrap_or(Value::Undefined))
                .collect();
            self.pos += 1;
            return Some(row);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn cursor_yields_exactly_n_values_regardless_of_storage_density() {
        let mut table = Table::new(vec![
            ColumnDescriptor::new("a", ColumnKind::Int),
            ColumnDescriptor::new("b", ColumnKind::Text),
        ]);
        table.add_record(&row(&[("a", Value::Int(1))]), OnMissingColumn::Undefined, 1).unwrap();
        table.add_record(&row(&[("a", Value::Int(2)), ("b", Value::Str("x".into()))]), OnMissingColumn::Undefined, 1).unwrap();
        table.add_record(&row(&[("a", Value::Int(3))]), OnMissingColumn::Undefined, 1).unwrap();

        let a: Vec<_> = table.get_cursor("a", 0).unwrap().collect();
        let b: Vec<_> = table.get_cursor("b", 0).unwrap().collect();
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 3);
        assert_eq!(b[0], Value::Undefined);
        assert_eq!(b[1], Value::Str("x".into()));
        assert_eq!(b[2], Value::Undefined);
    }

    #[test]
    fn multi_cursor_respects_filter_on_first_column() {
        let mut table = Table::new(vec![
            ColumnDescriptor::new("a", ColumnKind::Int),
            ColumnDescriptor::new("b", ColumnKind::Text),
        ]);
        for i in 0..5 {
            table
                .add_record(&row(&[("a", Value::Int(i)), ("b", Value::Str(format!("row{i}")))]), OnMissingColumn::Undefined, 1)
                .unwrap();
        }
        let filter: Box<dyn Fn(&Value) -> bool> = Box::new(|v| matches!(v, Value::Int(n) if n % 2 == 0));
        let rows: Vec<_> = table.get_multi_cursor(&["a", "b"], Some(filter)).unwrap().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![Value::Int(0), Value::Str("row0".into())]);
        assert_eq!(rows[1], vec![Value::Int(2), Value::Str("row2".into())]);
    }

    #[test]
    fn export_import_round_trip_across_disjoint_columns() {
        let mut a = Table::new(vec![ColumnDescriptor::new("ab", ColumnKind::Text), ColumnDescriptor::new("a", ColumnKind::Text)]);
        a.add_record(&row(&[("ab", Value::Str("1".into())), ("a", Value::Str("x".into()))]), OnMissingColumn::Undefined, 1).unwrap();

        let mut b = Table::new(vec![ColumnDescriptor::new("ab", ColumnKind::Text), ColumnDescriptor::new("b", ColumnKind::Text)]);
        b.add_record(&row(&[("ab", Value::Str("2".into())), ("b", Value::Str("y".into()))]), OnMissingColumn::Undefined, 1).unwrap();

        let snapshot_b = b.export();
        a.import(&snapshot_b);

        assert_eq!(a.row_count(), 2);
        let ab: Vec<_> = a.get_cursor("ab", 0).unwrap().collect();
        assert_eq!(ab, vec![Value::Str("1".into()), Value::Str("2".into())]);
        let col_a: Vec<_> = a.get_cursor("a", 0).unwrap().collect();
        assert_eq!(col_a, vec![Value::Str("x".into()), Value::Undefined]);
        let col_b: Vec<_> = a.get_cursor("b", 0).unwrap().collect();
        assert_eq!(col_b, vec![Value::Undefined, Value::Str("y".into())]);
    }

    #[test]
    fn missing_column_errors_when_requested() {
        let mut table = Table::new(vec![ColumnDescriptor::new("a", ColumnKind::Int)]);
        let err = table.add_record(&row(&[]), OnMissingColumn::Error, 1).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn(ref c) if c == "a"));
    }
}
