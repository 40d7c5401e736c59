// codec/mod.rs - ACL / SL0 Text Codec
//
//! Text codec for the FIPA S-expression syntax.
//!
//! One grammar engine serves two layers: [`sexpr`] parses any
//! S-expression into a generic AST, and [`acl_text`] projects that AST
//! into an [`AclMessage`](crate::message::AclMessage) or renders one back
//! to canonical text. SL0 content decoding in [`crate::sl0`] consumes the
//! same AST.

pub mod acl_text;
pub mod sexpr;

pub use acl_text::{dumps, parse};
pub use sexpr::{parse_sexpr, SExpr};

use thiserror::Error;

/// Errors from parsing ACL or SL0 text
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unexpected end of input at offset {position}: {message}")]
    UnexpectedEnd { position: usize, message: String },
}

impl ParseError {
    /// Byte offset where the error was detected
    pub fn position(&self) -> usize {
        match self {
            ParseError::Syntax { position, .. } => *position,
            ParseError::UnexpectedEnd { position, .. } => *position,
        }
    }
}
