//! redb table definitions for the attempt ledger.
//!
//! Keys are `&str`, values are JSON-serialized domain types.

use redb::TableDefinition;

/// Finished deployment attempts keyed by
/// `{tenant_id}:{started_at_ms:020}:{attempt_id}` so a prefix scan per
/// tenant yields attempts in start order.
pub const ATTEMPTS: TableDefinition<&str, &[u8]> = TableDefinition::new("attempts");
