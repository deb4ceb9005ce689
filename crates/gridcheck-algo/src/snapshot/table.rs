use super::{SnapshotError, BASE_CASE};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;

/// One contingency column. `None` cells are the non-convergent sentinel.
#[derive(Debug, Clone, Serialize)]
pub struct Column<V> {
    pub name: String,
    pub cells: Vec<Option<V>>,
}

/// Wide element table: one row per element, a base-case column fixed at
/// construction and one column per contingency in processing order.
///
/// Rows are fixed by the base capture. Values for keys the base never saw are
/// dropped; rows missing from a later capture get the sentinel.
#[derive(Debug, Clone)]
pub struct SnapshotTable<K, V> {
    keys: Vec<K>,
    positions: HashMap<K, usize>,
    base: Vec<Option<V>>,
    columns: Vec<Column<V>>,
    by_name: HashMap<String, usize>,
}

impl<K, V> SnapshotTable<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn with_base(rows: impl IntoIterator<Item = (K, Option<V>)>) -> Self {
        let mut keys = Vec::new();
        let mut positions = HashMap::new();
        let mut base = Vec::new();
        for (key, value) in rows {
            if positions.contains_key(&key) {
                continue;
            }
            positions.insert(key.clone(), keys.len());
            keys.push(key);
            base.push(value);
        }
        Self {
            keys,
            positions,
            base,
            columns: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    fn check_new_name(&self, contingency: &str) -> Result<(), SnapshotError> {
        if contingency == BASE_CASE {
            return Err(SnapshotError::ReservedName(contingency.to_string()));
        }
        if self.by_name.contains_key(contingency) {
            return Err(SnapshotError::DuplicateColumn(contingency.to_string()));
        }
        Ok(())
    }

    /// Append a column for `contingency`.
    pub fn append(
        &mut self,
        contingency: &str,
        values: impl IntoIterator<Item = (K, Option<V>)>,
    ) -> Result<(), SnapshotError> {
        self.check_new_name(contingency)?;
        let mut cells = vec![None; self.keys.len()];
        for (key, value) in values {
            if let Some(&row) = self.positions.get(&key) {
                cells[row] = value;
            }
        }
        self.push_column(contingency, cells);
        Ok(())
    }

    /// Append a column holding only the sentinel.
    pub fn append_sentinel(&mut self, contingency: &str) -> Result<(), SnapshotError> {
        self.check_new_name(contingency)?;
        let cells = vec![None; self.keys.len()];
        self.push_column(contingency, cells);
        Ok(())
    }

    fn push_column(&mut self, contingency: &str, cells: Vec<Option<V>>) {
        self.by_name
            .insert(contingency.to_string(), self.columns.len());
        self.columns.push(Column {
            name: contingency.to_string(),
            cells,
        });
    }

    /// Overwrite one cell of an existing contingency column. The base column
    /// cannot be amended.
    pub fn amend(&mut self, contingency: &str, key: &K, value: Option<V>) -> Result<(), SnapshotError> {
        if contingency == BASE_CASE {
            return Err(SnapshotError::BaseImmutable);
        }
        let column = *self
            .by_name
            .get(contingency)
            .ok_or_else(|| SnapshotError::MissingColumn(contingency.to_string()))?;
        if let Some(&row) = self.positions.get(key) {
            self.columns[column].cells[row] = value;
        }
        Ok(())
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn base(&self) -> &[Option<V>] {
        &self.base
    }

    /// Column by name, `BASE_CASE` included.
    pub fn column(&self, name: &str) -> Option<&[Option<V>]> {
        if name == BASE_CASE {
            return Some(&self.base);
        }
        self.by_name
            .get(name)
            .map(|&idx| self.columns[idx].cells.as_slice())
    }

    pub fn value(&self, name: &str, key: &K) -> Option<&V> {
        let row = *self.positions.get(key)?;
        self.column(name)?.get(row)?.as_ref()
    }

    pub fn contingency_columns(&self) -> &[Column<V>] {
        &self.columns
    }

    /// `BASE_CASE` followed by contingency names in processing order.
    pub fn column_names(&self) -> Vec<&str> {
        std::iter::once(BASE_CASE)
            .chain(self.columns.iter().map(|c| c.name.as_str()))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        name == BASE_CASE || self.by_name.contains_key(name)
    }

    /// Rows paired with the base value and the value under `name`.
    pub fn rows_for<'a>(
        &'a self,
        name: &str,
    ) -> Option<impl Iterator<Item = (&'a K, Option<&'a V>, Option<&'a V>)> + 'a> {
        let column = self.column(name)?;
        Some(
            self.keys
                .iter()
                .zip(self.base.iter())
                .zip(column.iter())
                .map(|((key, base), value)| (key, base.as_ref(), value.as_ref())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SnapshotTable<u32, f64> {
        SnapshotTable::with_base(vec![(1, Some(1.0)), (2, Some(0.98))])
    }

    #[test]
    fn append_preserves_order_and_base() {
        let mut t = table();
        t.append("B", vec![(2, Some(0.9)), (1, Some(1.01))]).unwrap();
        t.append("A", vec![(1, Some(1.02))]).unwrap();

        assert_eq!(t.column_names(), vec![BASE_CASE, "B", "A"]);
        assert_eq!(t.base(), &[Some(1.0), Some(0.98)]);
        assert_eq!(t.column("B").unwrap(), &[Some(1.01), Some(0.9)]);
        // row 2 missing from capture becomes the sentinel
        assert_eq!(t.column("A").unwrap(), &[Some(1.02), None]);
    }

    #[test]
    fn rejects_reserved_and_duplicate_names() {
        let mut t = table();
        assert!(matches!(
            t.append(BASE_CASE, vec![]),
            Err(SnapshotError::ReservedName(_))
        ));
        t.append_sentinel("X").unwrap();
        assert!(matches!(
            t.append("X", vec![]),
            Err(SnapshotError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn amend_touches_only_contingency_columns() {
        let mut t = table();
        t.append("X", vec![(1, Some(1.0)), (2, Some(1.0))]).unwrap();
        t.amend("X", &2, Some(4.0)).unwrap();
        assert_eq!(t.value("X", &2), Some(&4.0));
        assert!(matches!(
            t.amend(BASE_CASE, &2, Some(4.0)),
            Err(SnapshotError::BaseImmutable)
        ));
        assert!(matches!(
            t.amend("Y", &2, Some(4.0)),
            Err(SnapshotError::MissingColumn(_))
        ));
        assert_eq!(t.value(BASE_CASE, &2), Some(&0.98));
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let mut t = table();
        t.append("X", vec![(9, Some(1.0))]).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.column("X").unwrap(), &[None, None]);
    }
}
