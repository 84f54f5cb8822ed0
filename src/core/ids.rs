use uuid::Uuid;

/// Generate a fresh 128-bit response id as 32 lowercase hex characters.
/// Used for idempotent ingestion and client-side correlation.
pub fn response_id() -> String {
    Uuid::new_v4().simple().to_string()
}
