//! Per-call routing metadata.
//!
//! Routing parameters travel as gRPC metadata rather than message fields so the
//! same request shape can be pointed at any database, collection or table.
//! Every key an operation needs must be present exactly once.

use std::time::Duration;

use tonic::metadata::MetadataMap;

use crate::error::{AdapterError, AdapterResult};

pub const DB_NAME: &str = "dbname";
pub const COLLECTION_NAME: &str = "collectionname";
pub const TABLE_NAME: &str = "tablename";
pub const EXPIRATION_TIME: &str = "expirationtime";
pub const AUTHORIZATION: &str = "authorization";

/// Longest accepted session lifetime: one year.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Snapshot of the routing metadata taken before any domain logic runs.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    metadata: MetadataMap,
}

/// Database + collection pair for the document and key-value stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRoute {
    pub db: String,
    pub collection: String,
}

/// Database + table pair for the columnar store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRoute {
    pub db: String,
    pub table: String,
}

impl TableRoute {
    /// Fully qualified `db.table` name.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.db, self.table)
    }
}

/// Session time-to-live taken from `expirationtime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttl(u64);

impl Ttl {
    pub fn from_secs(secs: u64) -> AdapterResult<Self> {
        if secs == 0 {
            return Err(AdapterError::invalid(
                EXPIRATION_TIME,
                "must be a positive number of seconds",
            ));
        }
        if secs > MAX_TTL_SECS {
            return Err(AdapterError::invalid(
                EXPIRATION_TIME,
                format!("must not exceed {MAX_TTL_SECS} seconds"),
            ));
        }
        Ok(Self(secs))
    }

    pub fn secs(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl CallContext {
    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        Self {
            metadata: metadata.clone(),
        }
    }

    /// The single value of `key`; absent, repeated or non-ASCII values are client errors.
    pub fn single(&self, key: &str) -> AdapterResult<&str> {
        let mut values = self.metadata.get_all(key).iter();
        let (Some(value), None) = (values.next(), values.next()) else {
            return Err(AdapterError::missing(key));
        };
        value
            .to_str()
            .map_err(|e| AdapterError::invalid(key, e.to_string()))
    }

    pub fn collection_route(&self) -> AdapterResult<CollectionRoute> {
        Ok(CollectionRoute {
            db: self.single(DB_NAME)?.to_string(),
            collection: self.single(COLLECTION_NAME)?.to_string(),
        })
    }

    /// Table route with both names checked as plain identifiers, since they end up in SQL.
    pub fn table_route(&self) -> AdapterResult<TableRoute> {
        let db = self.single(DB_NAME)?;
        let table = self.single(TABLE_NAME)?;
        validate_identifier(DB_NAME, db)?;
        validate_identifier(TABLE_NAME, table)?;
        Ok(TableRoute {
            db: db.to_string(),
            table: table.to_string(),
        })
    }

    pub fn ttl(&self) -> AdapterResult<Ttl> {
        let raw = self.single(EXPIRATION_TIME)?;
        let secs = raw.trim().parse::<u64>().map_err(|e| {
            AdapterError::invalid(EXPIRATION_TIME, format!("'{raw}' is not a number: {e}"))
        })?;
        Ttl::from_secs(secs)
    }
}

pub fn validate_identifier(key: &str, value: &str) -> AdapterResult<()> {
    if value.is_empty() {
        return Err(AdapterError::invalid(key, "must not be empty"));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(AdapterError::invalid(
            key,
            format!("unexpected character '{bad}'"),
        ));
    }
    Ok(())
}
