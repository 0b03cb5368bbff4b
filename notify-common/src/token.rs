use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenPoolError {
    #[error("token pool requires at least one token")]
    Empty,
    #[error("token at position {0} is blank")]
    BlankToken(usize),
}

/// Round-robin pool of equivalent notification tokens.
///
/// The cursor points at the next token to hand out. It only moves on
/// `advance`, which callers invoke after a confirmed delivery, so a failed send
/// leaves the same token in place for the next notification.
#[derive(Debug, Clone)]
pub struct TokenPool {
    tokens: Vec<String>,
    cursor: usize,
}

impl TokenPool {
    pub fn new<I, S>(tokens: I) -> Result<Self, TokenPoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens
            .into_iter()
            .enumerate()
            .map(|(position, token)| match token.as_ref().trim() {
                "" => Err(TokenPoolError::BlankToken(position)),
                token => Ok(token.to_owned()),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if tokens.is_empty() {
            return Err(TokenPoolError::Empty);
        }

        Ok(Self { tokens, cursor: 0 })
    }

    pub fn current(&self) -> &str {
        &self.tokens[self.cursor]
    }

    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.tokens.len();
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
