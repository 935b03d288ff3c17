//! redb table definitions for the berth control plane.
//!
//! Every table uses `&str` keys and `&[u8]` values (JSON-serialized
//! records). Keys are natural identifiers, not composites: an application
//! name, a user email, a team name, a token string.

use redb::TableDefinition;

/// Application records keyed by application name.
pub const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");

/// User records keyed by email.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Team records keyed by team name.
pub const TEAMS: TableDefinition<&str, &[u8]> = TableDefinition::new("teams");

/// Access tokens keyed by the token string itself.
pub const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");
