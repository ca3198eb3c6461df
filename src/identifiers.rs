//! Deterministic derivation of the synthetic identifiers used while a
//! migration is active: shadow columns, duplicated constraints, trigger
//! functions, and the backfill sentinel column.

use crate::error::{MigrationError, Result};

pub const MAX_IDENTIFIER_LENGTH: usize = 63;

pub const NEEDS_BACKFILL_COLUMN: &str = "_pgroll_needs_backfill";

/// Fails with `InvalidIdentifierLength` if `name` exceeds the Postgres
/// identifier limit. User-supplied identifiers are checked with this;
/// generated identifiers are checked by construction (see `truncated`).
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrationError::InvalidIdentifierLength {
            identifier: name.to_string(),
            len: name.len(),
            limit: MAX_IDENTIFIER_LENGTH,
        });
    }
    Ok(())
}

/// Name of the shadow column that holds the new representation of `column`
/// while its migration is active.
pub fn temporary_name(column: &str) -> String {
    truncated("_pgroll_new_", column)
}

/// Name of the duplicated constraint or index that shadows a constraint on
/// `column` while its migration is active.
pub fn duplicate_name(name: &str) -> String {
    truncated("_pgroll_dup_", name)
}

/// Name of the trigger (and its backing function, with a `_fn` suffix) that
/// keeps `column` and its shadow in sync. `direction` is `"up"` or `"down"`.
pub fn trigger_name(table: &str, column: &str, direction: &str) -> String {
    let digest = digest(&format!("{table}.{column}.{direction}"));
    truncated(&format!("_pgroll_trigger_{direction}_"), &digest)
}

pub fn trigger_function_name(table: &str, column: &str, direction: &str) -> String {
    let digest = digest(&format!("{table}.{column}.{direction}.fn"));
    truncated(&format!("_pgroll_trigger_{direction}_fn_"), &digest)
}

pub(crate) fn digest(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Builds `prefix + base`, truncating `base` and appending a short content
/// hash when the combination would exceed the identifier length limit, so
/// that two different `base` values never collide after truncation.
fn truncated(prefix: &str, base: &str) -> String {
    let candidate = format!("{prefix}{base}");
    if candidate.len() <= MAX_IDENTIFIER_LENGTH {
        return candidate;
    }

    let hash = digest(base);
    let suffix = &hash[..8];
    // "_" + suffix
    let reserved = prefix.len() + 1 + suffix.len();
    let budget = MAX_IDENTIFIER_LENGTH.saturating_sub(reserved);

    let mut truncated_base: String = base.chars().collect();
    truncated_base.truncate(budget);

    format!("{prefix}{truncated_base}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_pass_through() {
        assert_eq!(temporary_name("email"), "_pgroll_new_email");
        assert_eq!(duplicate_name("users_email_key"), "_pgroll_dup_users_email_key");
    }

    #[test]
    fn long_names_are_truncated_and_disambiguated() {
        let long = "a".repeat(80);
        let name = temporary_name(&long);
        assert!(name.len() <= MAX_IDENTIFIER_LENGTH);
        assert!(name.starts_with("_pgroll_new_"));
    }

    #[test]
    fn truncation_disambiguates_distinct_long_inputs() {
        let a = "x".repeat(80);
        let mut b = "x".repeat(79);
        b.push('y');
        assert_ne!(temporary_name(&a), temporary_name(&b));
    }

    #[test]
    fn trigger_names_are_stable_and_direction_distinct() {
        let up = trigger_name("orders", "status", "up");
        let down = trigger_name("orders", "status", "down");
        assert_ne!(up, down);
        assert_eq!(up, trigger_name("orders", "status", "up"));
        assert!(up.len() <= MAX_IDENTIFIER_LENGTH);
    }

    #[test]
    fn validate_identifier_rejects_overlong_names() {
        let name = "x".repeat(64);
        assert!(validate_identifier(&name).is_err());
        assert!(validate_identifier(&"x".repeat(63)).is_ok());
    }
}
