//! Whitespace token counting for checkpoint context summaries.

pub const MAX_SUMMARY_TOKENS: usize = 500;

/// Number of whitespace-delimited words in `text`.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryCheck {
    pub token_count: usize,
    pub limit: usize,
}

impl SummaryCheck {
    pub fn is_valid(&self) -> bool {
        self.token_count <= self.limit
    }

    pub fn error(&self) -> Option<String> {
        (!self.is_valid()).then(|| {
            format!(
                "Context summary exceeds {} token limit (actual: {} tokens)",
                self.limit, self.token_count
            )
        })
    }
}

pub fn validate_context_summary(summary: &str) -> SummaryCheck {
    validate_with_limit(summary, MAX_SUMMARY_TOKENS)
}

pub fn validate_with_limit(summary: &str, limit: usize) -> SummaryCheck {
    SummaryCheck {
        token_count: count_tokens(summary),
        limit,
    }
}
