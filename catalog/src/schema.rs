//! The in-memory schema shape (§3), shared between the on-disk codec and
//! every layer that needs to resolve a column name to its declared type
//! and position.

use std::collections::HashMap;

use common::error::Error;
use common::value::DataType;
use common::CResult;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub is_key: bool,
    /// Index into `Schema::columns`, in declared order.
    pub column_index: u32,
    /// Index into `Schema::keys` (if a key) or `Schema::values` otherwise.
    pub position: u32,
}

/// A single table's schema: column declarations plus the key/value split
/// that determines row-key and row-value tuple layout (§3 invariant 3).
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub columns: Vec<Column>,
    pub keys: Vec<Column>,
    pub values: Vec<Column>,
    pub name_map: HashMap<String, usize>,
}

impl Schema {
    /// Validate and build a schema from a column list and a primary-key
    /// column-name ordering (§4.2 `CreateTable`): duplicate column names,
    /// duplicate PK entries, every PK name resolving, and at least one PK
    /// column are all checked here.
    pub fn build(column_defs: &[(String, DataType)], primary_key: &[String]) -> CResult<Schema> {
        let mut name_map = HashMap::new();
        let mut columns = Vec::with_capacity(column_defs.len());
        for (i, (name, data_type)) in column_defs.iter().enumerate() {
            if name_map.insert(name.clone(), i).is_some() {
                return Err(Error::schema(format!("multiple definition of identifier {name}")));
            }
            columns.push(Column {
                name: name.clone(),
                data_type: *data_type,
                is_key: false,
                column_index: i as u32,
                position: 0,
            });
        }

        if primary_key.is_empty() {
            return Err(Error::schema("primary key not declared"));
        }

        let mut seen_keys = HashMap::new();
        for key_name in primary_key {
            let idx = *name_map
                .get(key_name)
                .ok_or_else(|| Error::schema(format!("unknown definition {key_name} referenced in primary key")))?;
            if seen_keys.insert(key_name.clone(), ()).is_some() {
                return Err(Error::schema(format!("duplicate definition {key_name} referenced in primary key")));
            }
            columns[idx].is_key = true;
        }

        let mut keys = Vec::with_capacity(primary_key.len());
        for (pos, key_name) in primary_key.iter().enumerate() {
            let idx = name_map[key_name];
            let mut col = columns[idx].clone();
            col.position = pos as u32;
            columns[idx].position = pos as u32;
            keys.push(col);
        }

        let mut values = Vec::new();
        for col in columns.iter_mut() {
            if !col.is_key {
                col.position = values.len() as u32;
                values.push(col.clone());
            }
        }

        Ok(Schema {
            columns,
            keys,
            values,
            name_map,
        })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.name_map.get(name).map(|&i| &self.columns[i])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builds_key_value_split() {
        let defs = vec![
            ("a".to_string(), DataType::Int),
            ("b".to_string(), DataType::Timestamp),
            ("c".to_string(), DataType::Double),
        ];
        let schema = Schema::build(&defs, &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(schema.keys.len(), 2);
        assert_eq!(schema.values.len(), 1);
        assert_eq!(schema.values[0].name, "c");
    }

    #[test]
    fn rejects_duplicate_column_names() {
        let defs = vec![("a".to_string(), DataType::Int), ("a".to_string(), DataType::Int)];
        assert!(Schema::build(&defs, &["a".to_string()]).is_err());
    }

    #[test]
    fn rejects_unknown_primary_key_column() {
        let defs = vec![("a".to_string(), DataType::Int)];
        assert!(Schema::build(&defs, &["zzz".to_string()]).is_err());
    }

    #[test]
    fn rejects_empty_primary_key() {
        let defs = vec![("a".to_string(), DataType::Int)];
        assert!(Schema::build(&defs, &[]).is_err());
    }
}
