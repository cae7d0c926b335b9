use redb::TableDefinition;

/// Prepared devices keyed by claim UID.
pub const PREPARED_CLAIMS: TableDefinition<&str, &[u8]> = TableDefinition::new("prepared_claims");
