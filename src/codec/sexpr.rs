// codec/sexpr.rs - S-expression Parser
//
//! Recursive-descent parser for the parenthesized S-expression syntax
//! shared by the ACL string representation and SL0 content.
//!
//! # Grammar
//!
//! ```text
//! sexpr  := list | atom
//! list   := '(' sexpr* ')'
//! atom   := string | number | symbol
//! string := '"' (escape | char)* '"'
//! number := optionally signed decimal integer or float
//! symbol := any other word
//! ```
//!
//! Whitespace and `;`-to-end-of-line comments separate tokens. A word is a
//! maximal run of characters other than whitespace, parentheses, `"` and
//! `;`; peer platforms put `@`, `:`, `/` and `.` into agent names and URLs,
//! so words are deliberately permissive. Slot keywords such as `:name` are
//! symbols whose leading colon is preserved. Words that look numeric but
//! fail to parse as a number (timestamps such as `20260825T101530`) fall
//! back to symbols.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ParseError;

/// Parsed S-expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SExpr {
    List(Vec<SExpr>),
    Str(String),
    Int(i64),
    Float(f64),
    Symbol(String),
}

impl SExpr {
    /// Elements when this node is a list
    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List(items) => Some(items),
            _ => None,
        }
    }

    /// Text of a string or symbol atom
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SExpr::Str(s) | SExpr::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Text form of any atom, rendering numbers
    pub fn atom_text(&self) -> Option<String> {
        match self {
            SExpr::Str(s) | SExpr::Symbol(s) => Some(s.clone()),
            SExpr::Int(i) => Some(i.to_string()),
            SExpr::Float(x) => Some(format!("{x:?}")),
            SExpr::List(_) => None,
        }
    }

    /// Head symbol when this node is a non-empty list led by a symbol
    pub fn head(&self) -> Option<&str> {
        match self {
            SExpr::List(items) => match items.first() {
                Some(SExpr::Symbol(s)) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExpr::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            SExpr::Str(s) => {
                f.write_str("\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        _ => write!(f, "{ch}")?,
                    }
                }
                f.write_str("\"")
            }
            SExpr::Int(i) => write!(f, "{i}"),
            SExpr::Float(x) => write!(f, "{x:?}"),
            SExpr::Symbol(s) => f.write_str(s),
        }
    }
}

/// Parse exactly one S-expression; trailing non-whitespace input is an error
pub fn parse_sexpr(input: &str) -> Result<SExpr, ParseError> {
    let mut parser = SexprParser::new(input);
    let node = parser.parse_node()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(ParseError::Syntax {
            position: parser.pos,
            message: "trailing characters after expression".to_string(),
        });
    }
    Ok(node)
}

/// True when `text` is one complete parenthesized expression with nothing
/// around it, so it can be embedded in ACL output verbatim and recovered
/// byte-identically on parse.
pub(crate) fn is_balanced_list(text: &str) -> bool {
    if !text.starts_with('(') {
        return false;
    }
    let mut parser = SexprParser::new(text);
    matches!(parser.parse_node(), Ok(SExpr::List(_))) && parser.pos == text.len()
}

/// True when `text` cannot be emitted as a bare word and re-read as the
/// same atom
pub(crate) fn needs_quoting(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        None => true,
        Some(first) if !(first.is_ascii_alphabetic() || first == '_') => true,
        Some(_) => text
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';' | '\\')),
    }
}

/// Slot keyword text (`:name` -> `name`), if this node is one
pub(crate) fn keyword_of(node: &SExpr) -> Option<&str> {
    match node {
        SExpr::Symbol(s) if s.len() > 1 && s.starts_with(':') => Some(&s[1..]),
        _ => None,
    }
}

/// Items of a `(set ...)` or `(sequence ...)` node.
///
/// Tolerates a plain list without the head symbol and treats a lone atom
/// as a one-element collection, the way loose peers emit these.
pub(crate) fn collection_items(node: &SExpr) -> Vec<&SExpr> {
    match node {
        SExpr::List(items) => match items.first() {
            Some(SExpr::Symbol(head))
                if head.eq_ignore_ascii_case("set") || head.eq_ignore_ascii_case("sequence") =>
            {
                items[1..].iter().collect()
            }
            _ => items.iter().collect(),
        },
        other => vec![other],
    }
}

/// Strip redundant single-element list nesting, `((x))` -> `x`
pub(crate) fn unwrap_singletons(node: &SExpr) -> &SExpr {
    let mut current = node;
    while let SExpr::List(items) = current {
        match items.as_slice() {
            [only] => current = only,
            _ => break,
        }
    }
    current
}

pub(crate) struct SexprParser<'a> {
    pub(crate) input: &'a str,
    pub(crate) pos: usize,
}

impl<'a> SexprParser<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub(crate) fn skip_whitespace(&mut self) {
        while !self.at_end() {
            let c = self.peek_char();
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else if c == ';' {
                // Skip comment to end of line
                while !self.at_end() && self.peek_char() != '\n' {
                    self.pos += self.peek_char().len_utf8();
                }
            } else {
                break;
            }
        }
    }

    pub(crate) fn peek_char(&self) -> char {
        self.input[self.pos..].chars().next().unwrap_or('\0')
    }

    pub(crate) fn next_char(&mut self) -> char {
        let c = self.peek_char();
        if c != '\0' {
            self.pos += c.len_utf8();
        }
        c
    }

    pub(crate) fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        if self.at_end() {
            return Err(ParseError::UnexpectedEnd {
                position: self.pos,
                message: format!("expected '{expected}'"),
            });
        }
        let c = self.peek_char();
        if c == expected {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(ParseError::Syntax {
                position: self.pos,
                message: format!("expected '{expected}', found '{c}'"),
            })
        }
    }

    pub(crate) fn parse_node(&mut self) -> Result<SExpr, ParseError> {
        self.skip_whitespace();
        if self.at_end() {
            return Err(ParseError::UnexpectedEnd {
                position: self.pos,
                message: "expected expression".to_string(),
            });
        }
        match self.peek_char() {
            '(' => self.parse_list(),
            '"' => self.parse_string().map(SExpr::Str),
            ')' => Err(ParseError::Syntax {
                position: self.pos,
                message: "unexpected ')'".to_string(),
            }),
            _ => self.parse_word(),
        }
    }

    fn parse_list(&mut self) -> Result<SExpr, ParseError> {
        self.expect_char('(')?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.at_end() {
                return Err(ParseError::UnexpectedEnd {
                    position: self.pos,
                    message: "unterminated list".to_string(),
                });
            }
            if self.peek_char() == ')' {
                self.pos += 1;
                return Ok(SExpr::List(items));
            }
            items.push(self.parse_node()?);
        }
    }

    pub(crate) fn parse_string(&mut self) -> Result<String, ParseError> {
        self.expect_char('"')?;
        let mut result = String::new();
        while !self.at_end() {
            let c = self.next_char();
            if c == '"' {
                return Ok(result);
            } else if c == '\\' {
                // Escape sequence
                let escaped = self.next_char();
                match escaped {
                    'n' => result.push('\n'),
                    't' => result.push('\t'),
                    'r' => result.push('\r'),
                    '"' => result.push('"'),
                    '\\' => result.push('\\'),
                    _ => result.push(escaped),
                }
            } else {
                result.push(c);
            }
        }
        Err(ParseError::UnexpectedEnd {
            position: self.pos,
            message: "unterminated string".to_string(),
        })
    }

    fn parse_word(&mut self) -> Result<SExpr, ParseError> {
        let start = self.pos;
        while !self.at_end() {
            let c = self.peek_char();
            if c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';') {
                break;
            }
            self.pos += c.len_utf8();
        }
        if self.pos == start {
            return Err(ParseError::Syntax {
                position: start,
                message: format!("unexpected character '{}'", self.peek_char()),
            });
        }
        Ok(classify_word(&self.input[start..self.pos]))
    }
}

fn classify_word(word: &str) -> SExpr {
    let bytes = word.as_bytes();
    let numeric_looking = match bytes.first() {
        Some(b'0'..=b'9') => true,
        Some(b'+' | b'-' | b'.') => matches!(bytes.get(1), Some(b'0'..=b'9')),
        _ => false,
    };
    if numeric_looking {
        if let Ok(i) = word.parse::<i64>() {
            return SExpr::Int(i);
        }
        if let Ok(x) = word.parse::<f64>() {
            return SExpr::Float(x);
        }
    }
    SExpr::Symbol(word.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_atoms() {
        assert_eq!(parse_sexpr("42").unwrap(), SExpr::Int(42));
        assert_eq!(parse_sexpr("-17").unwrap(), SExpr::Int(-17));
        assert_eq!(parse_sexpr("3.25").unwrap(), SExpr::Float(3.25));
        assert_eq!(parse_sexpr("-4.5e3").unwrap(), SExpr::Float(-4500.0));
        assert_eq!(
            parse_sexpr("hello-world").unwrap(),
            SExpr::Symbol("hello-world".to_string())
        );
        assert_eq!(
            parse_sexpr(r#""a \"quoted\" \\ string""#).unwrap(),
            SExpr::Str("a \"quoted\" \\ string".to_string())
        );
    }

    #[test]
    fn test_platform_names_are_symbols() {
        assert_eq!(
            parse_sexpr("df@platform:1099/JADE").unwrap(),
            SExpr::Symbol("df@platform:1099/JADE".to_string())
        );
        assert_eq!(
            parse_sexpr("http://host:7778/acc").unwrap(),
            SExpr::Symbol("http://host:7778/acc".to_string())
        );
    }

    #[test]
    fn test_numeric_looking_timestamp_is_a_symbol() {
        assert_eq!(
            parse_sexpr("20260825T101530").unwrap(),
            SExpr::Symbol("20260825T101530".to_string())
        );
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(parse_sexpr("()").unwrap(), SExpr::List(vec![]));
        assert_eq!(parse_sexpr("  ( ) ").unwrap(), SExpr::List(vec![]));
    }

    #[test]
    fn test_nested_list_with_comments() {
        let input = "; registration\n(register (df-agent-description :name agent1)) ; end";
        let node = parse_sexpr(input).unwrap();
        let items = node.as_list().unwrap();
        assert_eq!(items[0], SExpr::Symbol("register".to_string()));
        assert_eq!(items[1].head(), Some("df-agent-description"));
    }

    #[test]
    fn test_unterminated_list() {
        let err = parse_sexpr("(a (b c)").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEnd { .. }));
        assert_eq!(err.position(), 8);
    }

    #[test]
    fn test_unterminated_string() {
        let err = parse_sexpr("\"abc").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEnd { .. }));
    }

    #[test]
    fn test_stray_close_paren() {
        let err = parse_sexpr(")").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { position: 0, .. }));
    }

    #[test]
    fn test_trailing_input_rejected() {
        let err = parse_sexpr("(a) (b)").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { position: 4, .. }));
    }

    #[test]
    fn test_display_reparses_to_same_tree() {
        let node = parse_sexpr(r#"(result (action x) (set (sd :name "a b" :cost 2.5)))"#).unwrap();
        assert_eq!(parse_sexpr(&node.to_string()).unwrap(), node);
    }

    #[test]
    fn test_is_balanced_list() {
        assert!(is_balanced_list("(a b)"));
        assert!(is_balanced_list("((action x (register y)))"));
        assert!(is_balanced_list("(a \"with ) inside\")"));
        assert!(!is_balanced_list("hello"));
        assert!(!is_balanced_list("(a) (b)"));
        assert!(!is_balanced_list(" (a)"));
        assert!(!is_balanced_list("(a) "));
        assert!(!is_balanced_list("(unclosed"));
        assert!(!is_balanced_list(""));
    }

    #[test]
    fn test_collection_items_tolerance() {
        let set = parse_sexpr("(set a b)").unwrap();
        assert_eq!(collection_items(&set).len(), 2);
        let bare_list = parse_sexpr("(a b)").unwrap();
        assert_eq!(collection_items(&bare_list).len(), 2);
        let atom = parse_sexpr("a").unwrap();
        assert_eq!(collection_items(&atom).len(), 1);
        let empty_set = parse_sexpr("(set)").unwrap();
        assert!(collection_items(&empty_set).is_empty());
    }

    #[test]
    fn test_unwrap_singletons() {
        let node = parse_sexpr("(((done (action x y))))").unwrap();
        assert_eq!(unwrap_singletons(&node).head(), Some("done"));
        let flat = parse_sexpr("(a b)").unwrap();
        assert_eq!(unwrap_singletons(&flat), &flat);
    }
}
