use crate::models::Memo;

/// Literal, case-insensitive substring matcher over memo title and content.
#[derive(Debug, Clone)]
pub struct MemoMatcher {
    needle: String,
}

impl MemoMatcher {
    /// Returns `None` for a blank query so callers never match everything.
    /// Surrounding whitespace in a non-blank query is part of the needle.
    pub fn new(query: &str) -> Option<Self> {
        if query.trim().is_empty() {
            return None;
        }
        Some(Self {
            needle: query.to_lowercase(),
        })
    }

    pub fn matches(&self, memo: &Memo) -> bool {
        self.matches_field(memo.title.as_deref()) || self.matches_field(memo.content.as_deref())
    }

    fn matches_field(&self, field: Option<&str>) -> bool {
        match field {
            Some(text) if !text.is_empty() => text.to_lowercase().contains(&self.needle),
            _ => false,
        }
    }
}

/// Keeps the order of `memos`; the store hands them over newest first.
pub fn search_memos(memos: Vec<Memo>, query: &str) -> Vec<Memo> {
    let Some(matcher) = MemoMatcher::new(query) else {
        return Vec::new();
    };
    memos.into_iter().filter(|memo| matcher.matches(memo)).collect()
}
