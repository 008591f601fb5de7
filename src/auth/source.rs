//! Token sources that need no network round trip, and the configured choice.

use super::{Result, TokenSource, TokenTarget, TokenValue, TokenizerClient};

/// Returns the same configured token for every target.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    value: TokenValue,
}

impl StaticTokenSource {
    pub fn new(value: TokenValue) -> Self {
        StaticTokenSource { value }
    }
}

impl TokenSource for StaticTokenSource {
    async fn acquire(&self, _target: &TokenTarget) -> Result<TokenValue> {
        Ok(self.value.clone())
    }
}

/// The token source chosen by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredTokenSource {
    Static(StaticTokenSource),
    Tokenizer(TokenizerClient),
}

impl TokenSource for ConfiguredTokenSource {
    async fn acquire(&self, target: &TokenTarget) -> Result<TokenValue> {
        match self {
            ConfiguredTokenSource::Static(source) => source.acquire(target).await,
            ConfiguredTokenSource::Tokenizer(source) => source.acquire(target).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DraftId;

    #[tokio::test]
    async fn static_source_ignores_target() {
        let source = ConfiguredTokenSource::Static(StaticTokenSource::new(TokenValue::new("fixed")));
        let a = source.acquire(&TokenTarget::new("x", DraftId(1))).await.unwrap();
        let b = source.acquire(&TokenTarget::new("y", DraftId(2))).await.unwrap();
        assert_eq!(a.expose(), "fixed");
        assert_eq!(a, b);
    }
}
