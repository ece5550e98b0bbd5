//! Content gate consulted before a message is inserted.

use crate::error::AppResult;
use async_trait::async_trait;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModerationVerdict {
    pub flagged: bool,
    pub reason: Option<String>,
}

impl ModerationVerdict {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn flag(reason: impl Into<String>) -> Self {
        Self {
            flagged: true,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait ModerationGate: Send + Sync {
    async fn check(&self, text: &str) -> AppResult<ModerationVerdict>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllModeration;

#[async_trait]
impl ModerationGate for AllowAllModeration {
    async fn check(&self, _text: &str) -> AppResult<ModerationVerdict> {
        Ok(ModerationVerdict::allow())
    }
}

/// Case-insensitive substring match against a fixed blocklist
#[derive(Debug, Clone, Default)]
pub struct KeywordModeration {
    terms: Vec<String>,
}

impl KeywordModeration {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { terms }
    }
}

#[async_trait]
impl ModerationGate for KeywordModeration {
    async fn check(&self, text: &str) -> AppResult<ModerationVerdict> {
        let lowered = text.to_lowercase();
        match self.terms.iter().find(|term| lowered.contains(term.as_str())) {
            Some(term) => {
                tracing::info!(term = %term, "message flagged by keyword moderation");
                Ok(ModerationVerdict::flag("Message contains blocked content"))
            }
            None => Ok(ModerationVerdict::allow()),
        }
    }
}
