use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ::time::OffsetDateTime;

use crate::repository::table::{Record, Table};
use certcheck_common::error::AppError;

struct TableData<R: Record> {
    rows: HashMap<String, R>,
    /// attribute -> attribute value -> primary keys
    indexes: HashMap<&'static str, HashMap<String, HashSet<String>>>,
}

impl<R: Record> TableData<R> {
    fn index_row(&mut self, record: &R) {
        let primary_key = record.primary_key();
        for &attribute in R::indexed_attributes() {
            if let Some(value) = record.attribute_value(attribute) {
                self.indexes
                    .entry(attribute)
                    .or_default()
                    .entry(value)
                    .or_default()
                    .insert(primary_key.clone());
            }
        }
    }

    fn unindex_row(&mut self, record: &R) {
        let primary_key = record.primary_key();
        for &attribute in R::indexed_attributes() {
            if let Some(value) = record.attribute_value(attribute) {
                if let Some(values) = self.indexes.get_mut(attribute) {
                    if let Some(keys) = values.get_mut(&value) {
                        keys.remove(&primary_key);
                        if keys.is_empty() {
                            values.remove(&value);
                        }
                    }
                }
            }
        }
    }

    fn remove_row(&mut self, primary_key: &str) -> Option<R> {
        let removed = self.rows.remove(primary_key);
        if let Some(record) = &removed {
            self.unindex_row(record);
        }
        removed
    }
}

/// In-memory table, with secondary indexes and auto-expiring rows
pub struct InMemTable<R: Record> {
    name: String,
    data: RwLock<TableData<R>>,
}

impl<R: Record> InMemTable<R> {
    /// Creates a new in-memory table.
    pub fn new(name: &str) -> InMemTable<R> {
        InMemTable {
            name: name.to_string(),
            data: RwLock::new(TableData {
                rows: HashMap::new(),
                indexes: HashMap::new(),
            }),
        }
    }

    /// Number of stored rows, expired rows included
    pub fn row_count(&self) -> Result<usize, AppError> {
        Ok(self.access_data_for_read()?.rows.len())
    }

    fn access_data_for_write(&self) -> Result<RwLockWriteGuard<'_, TableData<R>>, AppError> {
        self.data.write().map_err(|err| {
            AppError::General(format!(
                "Failed to access write lock to table: table={}, err={}",
                &self.name, err
            ))
        })
    }

    fn access_data_for_read(&self) -> Result<RwLockReadGuard<'_, TableData<R>>, AppError> {
        self.data.read().map_err(|err| {
            AppError::General(format!(
                "Failed to access read lock to table: table={}, err={}",
                &self.name, err
            ))
        })
    }
}

impl<R: Record> Table<R> for InMemTable<R> {
    fn put(&self, record: R) -> Result<Option<R>, AppError> {
        let mut data = self.access_data_for_write()?;
        let previous = data.remove_row(&record.primary_key());
        data.index_row(&record);
        data.rows.insert(record.primary_key(), record);
        Ok(previous)
    }

    fn get(&self, primary_key: &str) -> Result<Option<R>, AppError> {
        let now = OffsetDateTime::now_utc();
        let data = self.access_data_for_read()?;
        Ok(data
            .rows
            .get(primary_key)
            .filter(|record| !record.is_expired(&now))
            .cloned())
    }

    fn delete(&self, primary_key: &str) -> Result<Option<R>, AppError> {
        let mut data = self.access_data_for_write()?;
        Ok(data.remove_row(primary_key))
    }

    fn search_by(&self, attribute: &str, value: &str) -> Result<Vec<R>, AppError> {
        if !R::indexed_attributes().iter().any(|indexed| *indexed == attribute) {
            return Err(AppError::General(format!(
                "Attribute not indexed: table={}, attr={}",
                &self.name, attribute
            )));
        }

        let now = OffsetDateTime::now_utc();
        let data = self.access_data_for_read()?;
        let primary_keys = match data
            .indexes
            .get(attribute)
            .and_then(|values| values.get(value))
        {
            Some(primary_keys) => primary_keys,
            None => return Ok(vec![]),
        };

        Ok(primary_keys
            .iter()
            .filter_map(|primary_key| data.rows.get(primary_key))
            .filter(|record| !record.is_expired(&now))
            .cloned()
            .collect())
    }

    fn purge_expired(&self) -> Result<usize, AppError> {
        let now = OffsetDateTime::now_utc();
        let mut data = self.access_data_for_write()?;
        let expired_keys: Vec<String> = data
            .rows
            .values()
            .filter(|record| record.is_expired(&now))
            .map(|record| record.primary_key())
            .collect();
        for primary_key in &expired_keys {
            data.remove_row(primary_key);
        }
        Ok(expired_keys.len())
    }
}
