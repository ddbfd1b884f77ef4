use logos::Logos;

use crate::interpreter::error::SyntaxError;

/// Request lines are words separated by runs of spaces. Only the space
/// character separates; tabs and other whitespace belong to the word.
#[derive(Logos, Debug, PartialEq, Clone, Copy)]
#[logos(skip r" +")]
pub enum Token<'src> {
    #[regex(r"[^ ]+", |lex| lex.slice())]
    Word(&'src str),
}

/// One command of a request: mnemonic plus its `:`-prefixed argument suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandToken<'src> {
    pub name: &'src str,
    /// Empty, or starts with `:`.
    pub args: &'src str,
    pub span: std::ops::Range<usize>,
}

impl<'src> CommandToken<'src> {
    fn split(word: &'src str, span: std::ops::Range<usize>) -> Self {
        match word.find(':') {
            Some(i) => CommandToken { name: &word[..i], args: &word[i..], span },
            None => CommandToken { name: word, args: "", span },
        }
    }
}

/// The request text up to its first NUL, if any.
pub fn request_text(raw: &str) -> &str {
    match raw.find('\0') {
        Some(i) => &raw[..i],
        None => raw,
    }
}

/// Lazily split a request into commands. Nothing past the point where the
/// caller stops pulling is examined.
pub fn commands(request: &str) -> impl Iterator<Item = Result<CommandToken<'_>, SyntaxError>> + '_ {
    let mut lexer = Token::lexer(request_text(request));
    std::iter::from_fn(move || {
        let token = lexer.next()?;
        Some(match token {
            Ok(Token::Word(word)) => Ok(CommandToken::split(word, lexer.span())),
            Err(()) => Err(SyntaxError::InvalidCommand),
        })
    })
}
