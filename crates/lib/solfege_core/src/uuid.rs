//! Time-ordered identifiers.
//!
//! Impersonation `jti`s, reset record ids and audit rows are generated
//! app-side as UUIDv7 so that sorting by id follows creation order. `users`
//! keeps PostgreSQL's `gen_random_uuid()` (v4).

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
