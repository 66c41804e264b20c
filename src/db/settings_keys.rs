/// Canonical key constants for the `app_settings` table.
///
/// Use these instead of raw string literals to prevent typo-based key mismatches.

/// JSON array of past test runs, most recent first.
pub const TEST_HISTORY: &str = "test_history";
