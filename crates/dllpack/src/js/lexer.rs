use log::trace;

use super::token::{
    JsxAttrValue, JsxAttribute, JsxChild, JsxElement, TemplateLiteral, Token, TokenKind,
    is_expression_keyword,
};
use crate::error::TransformError;

/// Multi-character punctuators, longest first so the first match wins
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==", "!=",
    "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
    "**", "<<", ">>",
];

/// Tokenize a whole source file, keeping whitespace and comments as trivia tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, TransformError> {
    Lexer::new(source).tokenize()
}

/// Lossless JavaScript tokenizer.
///
/// Slash and angle-bracket ambiguity is settled by the previous significant token:
/// where an expression may start, `/` opens a regex literal and `<` followed by a
/// name opens a JSX element.
#[derive(Debug)]
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    /// True when the previous significant token allows an expression to follow
    expression_allowed: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            expression_allowed: true,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, TransformError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        trace!("Tokenized {} chars into {} tokens", self.chars.len(), tokens.len());
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(offset, ch)| self.peek_at(offset) == Some(ch))
    }

    fn slice(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    fn error(&self, message: impl Into<String>) -> TransformError {
        TransformError::syntax(self.line, self.column, message)
    }

    /// Read the next token, or `None` at end of input
    pub fn next_token(&mut self) -> Result<Option<Token>, TransformError> {
        let Some(ch) = self.peek() else {
            return Ok(None);
        };
        let (start, line, column) = (self.pos, self.line, self.column);

        let kind = match ch {
            c if c.is_whitespace() || c == '\u{feff}' => {
                while self
                    .peek()
                    .is_some_and(|c| c.is_whitespace() || c == '\u{feff}')
                {
                    self.bump();
                }
                TokenKind::Whitespace
            }
            '/' if self.peek_at(1) == Some('/') => {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
                TokenKind::Comment
            }
            '/' if self.peek_at(1) == Some('*') => {
                self.read_block_comment(line, column)?;
                TokenKind::Comment
            }
            '/' if self.expression_allowed => {
                self.read_regex(line, column)?;
                TokenKind::Regex
            }
            '"' | '\'' => {
                self.read_string(ch, line, column)?;
                TokenKind::String
            }
            '`' => TokenKind::Template(self.read_template(line, column)?),
            '<' if self.expression_allowed && self.jsx_starts_here() => {
                TokenKind::Jsx(Box::new(self.read_jsx_element()?))
            }
            c if c.is_ascii_digit() => {
                self.read_number();
                TokenKind::Number
            }
            '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.read_number();
                TokenKind::Number
            }
            c if is_ident_start(c) => {
                while self.peek().is_some_and(is_ident_continue) {
                    self.bump();
                }
                TokenKind::Ident
            }
            _ => {
                self.read_punct();
                TokenKind::Punct
            }
        };

        let token = Token {
            kind,
            text: self.slice(start),
            line,
            column,
        };
        if !token.is_trivia() {
            self.expression_allowed = expression_may_follow(&token);
        }
        Ok(Some(token))
    }

    fn read_block_comment(&mut self, line: usize, column: usize) -> Result<(), TransformError> {
        self.bump();
        self.bump();
        loop {
            match self.peek() {
                None => {
                    return Err(TransformError::syntax(
                        line,
                        column,
                        "unterminated block comment",
                    ));
                }
                Some('*') if self.peek_at(1) == Some('/') => {
                    self.bump();
                    self.bump();
                    return Ok(());
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn read_regex(&mut self, line: usize, column: usize) -> Result<(), TransformError> {
        self.bump();
        let mut in_class = false;
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(TransformError::syntax(
                        line,
                        column,
                        "unterminated regular expression",
                    ));
                }
                Some('\\') => {
                    self.bump();
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some(_) => {}
            }
        }
        // flags
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        Ok(())
    }

    fn read_string(&mut self, quote: char, line: usize, column: usize) -> Result<(), TransformError> {
        self.bump();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(TransformError::syntax(
                        line,
                        column,
                        "unterminated string literal",
                    ));
                }
                Some('\\') => {
                    self.bump();
                }
                Some(c) if c == quote => return Ok(()),
                Some(_) => {}
            }
        }
    }

    fn read_template(&mut self, line: usize, column: usize) -> Result<TemplateLiteral, TransformError> {
        self.bump();
        let mut quasis = Vec::new();
        let mut expressions = Vec::new();
        let mut quasi = String::new();

        loop {
            match self.peek() {
                None => {
                    return Err(TransformError::syntax(
                        line,
                        column,
                        "unterminated template literal",
                    ));
                }
                Some('`') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    quasi.push('\\');
                    self.bump();
                    if let Some(escaped) = self.bump() {
                        quasi.push(escaped);
                    }
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    self.bump();
                    self.bump();
                    quasis.push(std::mem::take(&mut quasi));
                    expressions.push(self.read_embedded_expression()?);
                }
                Some(c) => {
                    quasi.push(c);
                    self.bump();
                }
            }
        }

        quasis.push(quasi);
        Ok(TemplateLiteral {
            quasis,
            expressions,
        })
    }

    /// Read the source of an expression up to the `}` that closes it.
    ///
    /// The opening `{` (or `${`) has already been consumed; the closing `}` is consumed
    /// but not included. Nested templates, strings and JSX are skipped over whole.
    fn read_embedded_expression(&mut self) -> Result<String, TransformError> {
        let (start, line, column) = (self.pos, self.line, self.column);
        let saved = self.expression_allowed;
        self.expression_allowed = true;

        let mut depth = 0usize;
        loop {
            let before = self.pos;
            let Some(token) = self.next_token()? else {
                return Err(TransformError::syntax(
                    line,
                    column,
                    "unterminated embedded expression",
                ));
            };
            if token.is_punct("{") {
                depth += 1;
            } else if token.is_punct("}") {
                if depth == 0 {
                    self.expression_allowed = saved;
                    return Ok(self.chars[start..before].iter().collect());
                }
                depth -= 1;
            }
        }
    }

    fn read_number(&mut self) {
        let hex = self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X'));
        while let Some(c) = self.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_' || c == '.') {
                break;
            }
            self.bump();
            if !hex && matches!(c, 'e' | 'E') && matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
        }
    }

    fn read_punct(&mut self) {
        for punct in PUNCTUATORS {
            if !self.starts_with(punct) {
                continue;
            }
            // `a?.5:b` is a conditional, not optional chaining
            if *punct == "?." && self.peek_at(2).is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            for _ in 0..punct.len() {
                self.bump();
            }
            return;
        }
        self.bump();
    }

    fn jsx_starts_here(&self) -> bool {
        self.peek_at(1)
            .is_some_and(|c| c == '>' || c.is_alphabetic() || c == '_' || c == '$')
    }

    fn skip_jsx_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), TransformError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{expected}' in JSX, found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}' in JSX, found end of input"))),
        }
    }

    fn read_jsx_name(&mut self) -> Result<String, TransformError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| is_ident_continue(c) || matches!(c, '.' | ':' | '-'))
        {
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("expected a JSX name"));
        }
        Ok(self.slice(start))
    }

    /// Parse one JSX element starting at `<`
    fn read_jsx_element(&mut self) -> Result<JsxElement, TransformError> {
        self.expect_char('<')?;
        self.skip_jsx_whitespace();

        if self.peek() == Some('>') {
            self.bump();
            let children = self.read_jsx_children(None)?;
            return Ok(JsxElement {
                name: None,
                attributes: Vec::new(),
                children,
            });
        }

        let name = self.read_jsx_name()?;
        let mut attributes = Vec::new();
        loop {
            self.skip_jsx_whitespace();
            match self.peek() {
                Some('/') => {
                    self.bump();
                    self.skip_jsx_whitespace();
                    self.expect_char('>')?;
                    return Ok(JsxElement {
                        name: Some(name),
                        attributes,
                        children: Vec::new(),
                    });
                }
                Some('>') => {
                    self.bump();
                    break;
                }
                Some('{') => {
                    self.bump();
                    self.skip_jsx_whitespace();
                    if !self.starts_with("...") {
                        return Err(self.error("expected '...' in JSX spread attribute"));
                    }
                    self.bump();
                    self.bump();
                    self.bump();
                    attributes.push(JsxAttribute::Spread(self.read_embedded_expression()?));
                }
                Some(c) if is_ident_start(c) => {
                    let attr_name = self.read_jsx_name()?;
                    self.skip_jsx_whitespace();
                    let value = if self.peek() == Some('=') {
                        self.bump();
                        self.skip_jsx_whitespace();
                        self.read_jsx_attr_value()?
                    } else {
                        JsxAttrValue::True
                    };
                    attributes.push(JsxAttribute::Named {
                        name: attr_name,
                        value,
                    });
                }
                Some(c) => {
                    return Err(self.error(format!("unexpected '{c}' in JSX tag <{name}>")));
                }
                None => return Err(self.error(format!("unterminated JSX tag <{name}>"))),
            }
        }

        let children = self.read_jsx_children(Some(&name))?;
        Ok(JsxElement {
            name: Some(name),
            attributes,
            children,
        })
    }

    fn read_jsx_attr_value(&mut self) -> Result<JsxAttrValue, TransformError> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                let (line, column) = (self.line, self.column);
                self.bump();
                let start = self.pos;
                while self.peek().is_some_and(|c| c != quote) {
                    self.bump();
                }
                if self.peek().is_none() {
                    return Err(TransformError::syntax(
                        line,
                        column,
                        "unterminated JSX attribute string",
                    ));
                }
                let value = self.slice(start);
                self.bump();
                Ok(JsxAttrValue::Str(value))
            }
            Some('{') => {
                self.bump();
                Ok(JsxAttrValue::Expr(self.read_embedded_expression()?))
            }
            Some('<') => Ok(JsxAttrValue::Element(Box::new(self.read_jsx_element()?))),
            _ => Err(self.error("expected a JSX attribute value")),
        }
    }

    /// Read children up to and including the closing tag matching `name`
    fn read_jsx_children(&mut self, name: Option<&str>) -> Result<Vec<JsxChild>, TransformError> {
        let display = name.unwrap_or("");
        let mut children = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error(format!("unterminated JSX element <{display}>"))),
                Some('{') => {
                    self.bump();
                    children.push(JsxChild::Expr(self.read_embedded_expression()?));
                }
                Some('<') => {
                    let mut offset = 1;
                    while self.peek_at(offset).is_some_and(char::is_whitespace) {
                        offset += 1;
                    }
                    if self.peek_at(offset) == Some('/') {
                        self.read_jsx_closing_tag(name)?;
                        return Ok(children);
                    }
                    children.push(JsxChild::Element(self.read_jsx_element()?));
                }
                Some(_) => {
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c != '{' && c != '<') {
                        self.bump();
                    }
                    children.push(JsxChild::Text(self.slice(start)));
                }
            }
        }
    }

    fn read_jsx_closing_tag(&mut self, name: Option<&str>) -> Result<(), TransformError> {
        self.expect_char('<')?;
        self.skip_jsx_whitespace();
        self.expect_char('/')?;
        self.skip_jsx_whitespace();
        let closing = if self.peek() == Some('>') {
            None
        } else {
            Some(self.read_jsx_name()?)
        };
        self.skip_jsx_whitespace();
        self.expect_char('>')?;

        if closing.as_deref() != name {
            return Err(self.error(format!(
                "expected closing tag </{}>, found </{}>",
                name.unwrap_or(""),
                closing.as_deref().unwrap_or("")
            )));
        }
        Ok(())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Decide whether an expression may start right after `token`
fn expression_may_follow(token: &Token) -> bool {
    match token.kind {
        TokenKind::Ident => is_expression_keyword(&token.text),
        TokenKind::Punct => !matches!(token.text.as_str(), ")" | "]" | "}" | "++" | "--"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn significant(source: &str) -> Vec<Token> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .filter(|t| !t.is_trivia())
            .collect()
    }

    #[test]
    fn test_lossless_round_trip() {
        let source = "const a = 1; // note\n/* block */ let b = `x${a}y`;\n";
        let tokens = tokenize(source).expect("tokenize");
        let rebuilt: String = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn test_regex_versus_division() {
        let tokens = significant("var r = /ab+c/gi; var d = a / b / c;");
        assert_eq!(tokens[3].kind, TokenKind::Regex);
        assert_eq!(tokens[3].text, "/ab+c/gi");
        let slashes = tokens.iter().filter(|t| t.is_punct("/")).count();
        assert_eq!(slashes, 2);
    }

    #[test]
    fn test_regex_with_slash_in_class() {
        let tokens = significant("x = /[/]+/.test(s)");
        assert_eq!(tokens[2].kind, TokenKind::Regex);
        assert_eq!(tokens[2].text, "/[/]+/");
    }

    #[test]
    fn test_template_with_nested_substitutions() {
        let tokens = significant("`a${b + `c${d}`}e`");
        let TokenKind::Template(template) = &tokens[0].kind else {
            panic!("expected template, got {:?}", tokens[0].kind);
        };
        assert_eq!(template.quasis, vec!["a".to_owned(), "e".to_owned()]);
        assert_eq!(template.expressions, vec!["b + `c${d}`".to_owned()]);
    }

    #[test]
    fn test_punctuators_longest_match() {
        let tokens = significant("a >>>= b === c => d ?. e");
        let puncts: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Punct)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(puncts, vec![">>>=", "===", "=>", "?."]);
    }

    #[test]
    fn test_less_than_is_not_jsx() {
        let tokens = significant("if (a < b) {}");
        assert!(tokens.iter().any(|t| t.is_punct("<")));
        assert!(!tokens.iter().any(|t| matches!(t.kind, TokenKind::Jsx(_))));
    }

    #[test]
    fn test_jsx_element_parsed() {
        let tokens = significant(r#"return <div className="box" onClick={this.go}>Hi {name}<br/></div>;"#);
        let TokenKind::Jsx(element) = &tokens[1].kind else {
            panic!("expected jsx, got {:?}", tokens[1].kind);
        };
        assert_eq!(element.name.as_deref(), Some("div"));
        assert_eq!(
            element.attributes,
            vec![
                JsxAttribute::Named {
                    name: "className".to_owned(),
                    value: JsxAttrValue::Str("box".to_owned()),
                },
                JsxAttribute::Named {
                    name: "onClick".to_owned(),
                    value: JsxAttrValue::Expr("this.go".to_owned()),
                },
            ]
        );
        assert_eq!(element.children.len(), 3);
        assert!(tokens[2].is_punct(";"));
    }

    #[test]
    fn test_jsx_mismatched_closing_tag() {
        let err = tokenize("x = <a><b></a></b>").expect_err("mismatched tags");
        assert!(matches!(err, TransformError::Syntax { .. }), "{err:?}");
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let err = tokenize("var a = 1;\nvar s = 'oops;\n").expect_err("unterminated");
        assert_eq!(
            err,
            TransformError::Syntax {
                line: 2,
                column: 9,
                message: "unterminated string literal".to_owned(),
            }
        );
    }

    #[test]
    fn test_unterminated_template() {
        let err = tokenize("var s = `abc").expect_err("unterminated");
        assert!(err.to_string().contains("unterminated template literal"));
    }
}
