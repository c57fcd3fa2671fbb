//! Schema descriptors loaded from the store's catalog.

use std::fmt::{self, Display};

use tessera_types::{ColumnSpec, DataType};

/// Keyspace-qualified name of a table or user type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub keyspace: String,
    pub name: String,
}

impl SchemaKey {
    pub fn new(keyspace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
        }
    }
}

impl Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.name)
    }
}

/// Column layout of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub key: SchemaKey,
    pub columns: Vec<ColumnSpec>,
    pub partition_key: Vec<String>,
    pub clustering_key: Vec<String>,
}

impl TableMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Partition key columns followed by clustering columns.
    pub fn primary_key(&self) -> impl Iterator<Item = &str> {
        self.partition_key
            .iter()
            .chain(self.clustering_key.iter())
            .map(String::as_str)
    }
}

/// Field layout of a user-defined type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserType {
    pub key: SchemaKey,
    pub fields: Vec<(String, DataType)>,
}

impl UserType {
    pub fn field(&self, name: &str) -> Option<DataType> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, data_type)| *data_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_orders_partition_before_clustering() {
        let table = TableMetadata {
            key: SchemaKey::new("app", "events"),
            columns: vec![
                ColumnSpec::new("tenant", DataType::BigInt),
                ColumnSpec::new("at", DataType::Timestamp),
                ColumnSpec::new("body", DataType::Text),
            ],
            partition_key: vec!["tenant".into()],
            clustering_key: vec!["at".into()],
        };

        assert_eq!(table.primary_key().collect::<Vec<_>>(), vec!["tenant", "at"]);
        assert_eq!(table.column("body").map(|c| c.data_type), Some(DataType::Text));
        assert_eq!(table.key.to_string(), "app.events");
    }

    #[test]
    fn user_type_field_lookup() {
        let address = UserType {
            key: SchemaKey::new("app", "address"),
            fields: vec![("street".into(), DataType::Text), ("zip".into(), DataType::Int)],
        };
        assert_eq!(address.field("zip"), Some(DataType::Int));
        assert_eq!(address.field("city"), None);
    }
}
