//! Token-to-credit conversion.
//!
//! Billing charges one credit per started block of 1000 classification
//! tokens. A batch that consumed no tokens costs nothing; there is no
//! minimum floor.

/// Tokens covered by one credit.
pub const TOKENS_PER_CREDIT: u64 = 1000;

/// Convert a total token count into credits: `ceil(total / 1000)`, 0 for 0.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn credits_for_tokens(total_tokens: u64) -> i64 {
    if total_tokens == 0 {
        return 0;
    }
    total_tokens.div_ceil(TOKENS_PER_CREDIT) as i64
}
