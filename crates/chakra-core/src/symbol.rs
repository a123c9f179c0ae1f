/// Canonical symbol normalization: trim then uppercase.
///
/// Total and idempotent. Empty results must be rejected by callers, never
/// silently included in a universe or snapshot.
pub fn normalize_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}
