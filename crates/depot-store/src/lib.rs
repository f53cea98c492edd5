pub mod catalog;
pub mod migrate;
pub mod schema;

pub use catalog::{Catalog, CatalogOptions, ListQuery, ListSort, StoreError};
pub use schema::SchemaVersion;
