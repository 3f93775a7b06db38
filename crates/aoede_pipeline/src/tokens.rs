//! Token cost estimation for context packing.
//!
//! No tokenizer dependency: the ~4 bytes/token rule is close enough for
//! budgeting, and using one function for planning and reporting keeps the
//! two views consistent.

/// Flat envelope cost per chat message (role tag, separators).
pub const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// `ceil(len / 4)` over bytes. Monotonic: longer text never costs less.
pub fn estimate_tokens(text: &str) -> u32 {
    ((text.len() + 3) / 4) as u32
}

/// Cost of one message including its envelope.
pub fn message_cost(text: &str) -> u32 {
    estimate_tokens(text) + MESSAGE_OVERHEAD_TOKENS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_estimate_counts_bytes_not_chars() {
        // Multi-byte characters cost their encoded length.
        let s = "日本語";
        assert_eq!(estimate_tokens(s), ((s.len() + 3) / 4) as u32);
        assert!(estimate_tokens(s) > estimate_tokens("abc"));
    }

    #[test]
    fn test_message_cost_adds_envelope() {
        assert_eq!(message_cost(""), MESSAGE_OVERHEAD_TOKENS);
        assert_eq!(message_cost("abcd"), 1 + MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn test_monotonic() {
        let mut prev = 0;
        for n in 0..64 {
            let cost = estimate_tokens(&"y".repeat(n));
            assert!(cost >= prev, "cost must not shrink as text grows");
            prev = cost;
        }
    }
}
