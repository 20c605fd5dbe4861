//! Segments the gateway's accumulated input into per-screen tokens.
//!
//! The gateway resends everything the subscriber typed since the session
//! started, joined with `*`. This is the only place that knows about that
//! encoding; the router works on tokens.

/// Separator the gateway uses between successive answers.
pub const DELIMITER: char = '*';

/// The ordered answers contained in one gateway request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens<'a> {
    items: Vec<&'a str>,
}

impl<'a> Tokens<'a> {
    /// Split accumulated text. Empty text yields zero tokens. Never fails.
    pub fn parse(text: &'a str) -> Self {
        if text.is_empty() {
            return Self { items: Vec::new() };
        }
        Self {
            items: text.split(DELIMITER).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Tokens from `consumed` onwards, paired with their absolute position.
    pub fn unconsumed(&self, consumed: usize) -> impl Iterator<Item = (usize, &'a str)> + '_ {
        self.items
            .iter()
            .copied()
            .enumerate()
            .skip(consumed)
    }
}
