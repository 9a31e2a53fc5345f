//! Task identifiers
//!
//! One id is generated per classification request and shared by its
//! prediction_log and feedback rows.

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Generate a task id in its stored (hyphenated, lowercase) form
pub fn generate_task_id() -> String {
    generate().to_string()
}

/// Parse UUID from string
pub fn parse(s: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(s)
}
