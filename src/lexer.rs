//! 字句解析
//!
//! 構造体断片のテキストをトークン列に変換する。
//! 行頭の `#` から始まる行はディレクティブ1トークンとしてまとめ、
//! コメントはここで捨てる。

use crate::error::{CompileError, LexError, Result};
use crate::source::SourceLocation;
use crate::token::{Directive, DirectiveKind, Token, TokenKind};

/// Lexer
pub struct Lexer<'a> {
    text: &'a str,
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    /// 行頭（空白以外の文字をまだ読んでいない）かどうか
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    /// 新しいLexerを作成
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            source: text.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            at_line_start: true,
        }
    }

    /// 現在位置を取得
    pub fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }

    /// 入力全体をトークン化（末尾に Eof を含む）
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = matches!(token.kind, TokenKind::Eof);
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// 次のトークンを取得
    pub fn next_token(&mut self) -> Result<Token> {
        loop {
            self.skip_whitespace();
            match (self.peek(), self.peek_n(1)) {
                (Some(b'/'), Some(b'/')) => self.skip_line_comment(),
                (Some(b'/'), Some(b'*')) => self.skip_block_comment()?,
                _ => break,
            }
        }

        let loc = self.current_location();
        let kind = if self.peek() == Some(b'#') && self.at_line_start {
            self.scan_directive()?
        } else {
            self.scan_token_kind()?
        };
        self.at_line_start = false;

        Ok(Token::new(kind, loc))
    }

    /// 現在の文字をピーク
    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    /// n文字先をピーク
    fn peek_n(&self, n: usize) -> Option<u8> {
        self.source.get(self.pos + n).copied()
    }

    /// 1文字進める
    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// 空白と改行をスキップ
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | b'\r' | b'\n' | 0x0C | 0x0B => {
                    self.advance();
                }
                // ディレクティブ外の行継続
                b'\\' if matches!(self.peek_n(1), Some(b'\n')) => {
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    /// 行コメントをスキップ
    fn skip_line_comment(&mut self) {
        while self.peek().is_some_and(|c| c != b'\n') {
            self.advance();
        }
    }

    /// ブロックコメントをスキップ
    fn skip_block_comment(&mut self) -> Result<()> {
        let loc = self.current_location();
        self.advance(); // /
        self.advance(); // *

        loop {
            match (self.peek(), self.peek_n(1)) {
                (Some(b'*'), Some(b'/')) => {
                    self.advance();
                    self.advance();
                    return Ok(());
                }
                (Some(_), _) => {
                    self.advance();
                }
                (None, _) => {
                    return Err(CompileError::Lex {
                        loc,
                        kind: LexError::UnterminatedComment,
                    });
                }
            }
        }
    }

    /// ディレクティブ行をスキャン
    ///
    /// 継続行は空白1つに、コメントは空白に置き換え、連続する空白は1つにまとめる。
    fn scan_directive(&mut self) -> Result<TokenKind> {
        self.advance(); // #
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.advance();
        }

        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
            self.advance();
        }
        let keyword = self.text[start..self.pos].to_string();

        let mut rest = String::new();
        loop {
            match (self.peek(), self.peek_n(1)) {
                (None, _) | (Some(b'\n'), _) => break,
                (Some(b'\\'), Some(b'\n')) => {
                    self.advance();
                    self.advance();
                    rest.push(' ');
                }
                (Some(b'\\'), Some(b'\r')) if self.peek_n(2) == Some(b'\n') => {
                    self.advance();
                    self.advance();
                    self.advance();
                    rest.push(' ');
                }
                (Some(b'/'), Some(b'/')) => self.skip_line_comment(),
                (Some(b'/'), Some(b'*')) => {
                    self.skip_block_comment()?;
                    rest.push(' ');
                }
                (Some(q @ (b'"' | b'\'')), _) => {
                    let literal = self.scan_quoted(q)?;
                    rest.push_str(&literal);
                }
                (Some(_), _) => {
                    let ch_start = self.pos;
                    self.advance();
                    // マルチバイト文字の途中で切らない
                    while self.pos < self.source.len() && !self.text.is_char_boundary(self.pos) {
                        self.pos += 1;
                    }
                    rest.push_str(&self.text[ch_start..self.pos]);
                }
            }
        }

        let rest = rest.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(TokenKind::Directive(Directive {
            kind: DirectiveKind::from_keyword(&keyword),
            rest,
        }))
    }

    /// トークン種別をスキャン
    fn scan_token_kind(&mut self) -> Result<TokenKind> {
        let Some(c) = self.peek() else {
            return Ok(TokenKind::Eof);
        };

        match c {
            // 識別子またはキーワード
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.scan_identifier(),

            // 数値リテラル
            b'0'..=b'9' => Ok(self.scan_number()),

            // 文字列・文字リテラル
            b'"' => Ok(TokenKind::StringLit(self.scan_quoted(b'"')?)),
            b'\'' => Ok(TokenKind::CharLit(self.scan_quoted(b'\'')?)),

            // 演算子・区切り記号
            b'+' => Ok(self.single(TokenKind::Plus)),
            b'-' => {
                self.advance();
                if self.peek() == Some(b'>') {
                    self.advance();
                    Ok(TokenKind::Arrow)
                } else {
                    Ok(TokenKind::Minus)
                }
            }
            b'*' => Ok(self.single(TokenKind::Star)),
            b'/' => Ok(self.single(TokenKind::Slash)),
            b'%' => Ok(self.single(TokenKind::Percent)),
            b'&' => Ok(self.one_or_two(b'&', TokenKind::Amp, TokenKind::AmpAmp)),
            b'|' => Ok(self.one_or_two(b'|', TokenKind::Pipe, TokenKind::PipePipe)),
            b'^' => Ok(self.single(TokenKind::Caret)),
            b'~' => Ok(self.single(TokenKind::Tilde)),
            b'!' => Ok(self.one_or_two(b'=', TokenKind::Bang, TokenKind::BangEq)),
            b'=' => Ok(self.one_or_two(b'=', TokenKind::Eq, TokenKind::EqEq)),
            b'<' => Ok(self.scan_angle(b'<', TokenKind::Lt, TokenKind::LtLt, TokenKind::LtEq)),
            b'>' => Ok(self.scan_angle(b'>', TokenKind::Gt, TokenKind::GtGt, TokenKind::GtEq)),
            b'?' => Ok(self.single(TokenKind::Question)),
            b':' => Ok(self.single(TokenKind::Colon)),
            b'.' => {
                if self.peek_n(1).is_some_and(|c| c.is_ascii_digit()) {
                    Ok(self.scan_number())
                } else if self.peek_n(1) == Some(b'.') && self.peek_n(2) == Some(b'.') {
                    self.advance();
                    self.advance();
                    self.advance();
                    Ok(TokenKind::Ellipsis)
                } else {
                    Ok(self.single(TokenKind::Dot))
                }
            }
            b',' => Ok(self.single(TokenKind::Comma)),
            b';' => Ok(self.single(TokenKind::Semi)),
            b'(' => Ok(self.single(TokenKind::LParen)),
            b')' => Ok(self.single(TokenKind::RParen)),
            b'[' => Ok(self.single(TokenKind::LBracket)),
            b']' => Ok(self.single(TokenKind::RBracket)),
            b'{' => Ok(self.single(TokenKind::LBrace)),
            b'}' => Ok(self.single(TokenKind::RBrace)),
            b'#' => Ok(self.one_or_two(b'#', TokenKind::Hash, TokenKind::HashHash)),

            _ => {
                let loc = self.current_location();
                let ch = self.text[self.pos..].chars().next().unwrap_or('\u{FFFD}');
                Err(CompileError::Lex {
                    loc,
                    kind: LexError::InvalidChar(ch),
                })
            }
        }
    }

    /// 1文字の記号
    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    /// 1文字または2文字の記号
    fn one_or_two(&mut self, second: u8, one: TokenKind, two: TokenKind) -> TokenKind {
        self.advance();
        if self.peek() == Some(second) {
            self.advance();
            two
        } else {
            one
        }
    }

    /// < << <= / > >> >=
    fn scan_angle(&mut self, c: u8, one: TokenKind, doubled: TokenKind, with_eq: TokenKind) -> TokenKind {
        self.advance();
        match self.peek() {
            Some(n) if n == c => {
                self.advance();
                doubled
            }
            Some(b'=') => {
                self.advance();
                with_eq
            }
            _ => one,
        }
    }

    /// 識別子またはキーワードをスキャン
    fn scan_identifier(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
            self.advance();
        }
        let text = &self.text[start..self.pos];

        // 接頭辞付きリテラル: L"..." u8"..." U'x' など
        if matches!(text, "L" | "u" | "U" | "u8") {
            if let Some(q @ (b'"' | b'\'')) = self.peek() {
                let body = self.scan_quoted(q)?;
                let literal = format!("{}{}", text, body);
                return Ok(if q == b'"' {
                    TokenKind::StringLit(literal)
                } else {
                    TokenKind::CharLit(literal)
                });
            }
        }

        Ok(TokenKind::from_keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string())))
    }

    /// 数値リテラル（pp-number）をスキャン
    ///
    /// 値は解釈せず字面をそのまま保持する。
    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;
        self.advance();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' {
                let exponent = matches!(c, b'e' | b'E' | b'p' | b'P');
                self.advance();
                if exponent && matches!(self.peek(), Some(b'+') | Some(b'-')) {
                    self.advance();
                }
            } else {
                break;
            }
        }
        TokenKind::Number(self.text[start..self.pos].to_string())
    }

    /// 引用符で囲まれたリテラルをスキャンし、引用符を含む字面を返す
    fn scan_quoted(&mut self, quote: u8) -> Result<String> {
        let loc = self.current_location();
        let start = self.pos;
        self.advance(); // 開き引用符

        let unterminated = if quote == b'"' {
            LexError::UnterminatedString
        } else {
            LexError::UnterminatedChar
        };

        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(self.text[start..self.pos].to_string());
                }
                Some(b'\\') => {
                    self.advance();
                    if self.peek().is_none() {
                        break;
                    }
                    self.advance();
                }
                Some(b'\n') | None => break,
                Some(_) => {
                    self.advance();
                }
            }
        }

        Err(CompileError::Lex {
            loc,
            kind: unterminated,
        })
    }
}

/// テキスト全体をトークン化
pub fn tokenize(text: &str) -> Result<Vec<Token>> {
    Lexer::new(text).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<TokenKind> {
        let mut tokens: Vec<TokenKind> = tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(tokens.pop(), Some(TokenKind::Eof));
        tokens
    }

    fn ident(s: &str) -> TokenKind {
        TokenKind::Ident(s.to_string())
    }

    #[test]
    fn test_operators() {
        let tokens = lex("* ( ) [ ] : , ; -> && || << >= ...");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Star,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::Colon,
                TokenKind::Comma,
                TokenKind::Semi,
                TokenKind::Arrow,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::LtLt,
                TokenKind::GtEq,
                TokenKind::Ellipsis,
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let tokens = lex("unsigned long long starttime;");
        assert_eq!(
            tokens,
            vec![
                TokenKind::KwUnsigned,
                TokenKind::KwLong,
                TokenKind::KwLong,
                ident("starttime"),
                TokenKind::Semi,
            ]
        );
    }

    #[test]
    fn test_numbers_keep_spelling() {
        let tokens = lex("0x1F 10UL 1e-3 .5");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Number("0x1F".to_string()),
                TokenKind::Number("10UL".to_string()),
                TokenKind::Number("1e-3".to_string()),
                TokenKind::Number(".5".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_dropped() {
        let tokens = lex("// line\nint /* block */ x; /* multi\nline */");
        assert_eq!(tokens, vec![TokenKind::KwInt, ident("x"), TokenKind::Semi]);
    }

    #[test]
    fn test_directive_line() {
        let tokens = lex("  #ifdef CONFIG_SMP /* smp */\nint x;\n#endif");
        assert_eq!(tokens.len(), 4);
        match &tokens[0] {
            TokenKind::Directive(d) => {
                assert_eq!(d.kind, DirectiveKind::Ifdef);
                assert_eq!(d.rest, "CONFIG_SMP");
            }
            other => panic!("expected directive, got {:?}", other),
        }
        assert!(matches!(&tokens[3], TokenKind::Directive(d) if d.kind == DirectiveKind::Endif));
    }

    #[test]
    fn test_directive_continuation() {
        let tokens = lex("#if defined(A) || \\\n    defined(B)\n#endif\n");
        match &tokens[0] {
            TokenKind::Directive(d) => {
                assert_eq!(d.kind, DirectiveKind::If);
                assert_eq!(d.rest, "defined(A) || defined(B)");
            }
            other => panic!("expected directive, got {:?}", other),
        }
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_hash_not_at_line_start() {
        let tokens = lex("a # b");
        assert_eq!(tokens, vec![ident("a"), TokenKind::Hash, ident("b")]);
    }

    #[test]
    fn test_other_directive() {
        let tokens = lex("#define FOO 1\n");
        assert!(matches!(
            &tokens[0],
            TokenKind::Directive(d) if d.kind == DirectiveKind::Other("define".to_string()) && d.rest == "FOO 1"
        ));
    }

    #[test]
    fn test_string_and_char_literals() {
        let tokens = lex(r#""a\"b" 'c' L"w""#);
        assert_eq!(
            tokens,
            vec![
                TokenKind::StringLit(r#""a\"b""#.to_string()),
                TokenKind::CharLit("'c'".to_string()),
                TokenKind::StringLit("L\"w\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_unterminated_comment() {
        let err = tokenize("int x; /* never closed").unwrap_err();
        assert_eq!(
            err,
            CompileError::Lex {
                loc: SourceLocation::new(1, 8),
                kind: LexError::UnterminatedComment,
            }
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("char *s = \"abc\n").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Lex { kind: LexError::UnterminatedString, .. }
        ));
    }

    #[test]
    fn test_locations() {
        let tokens = tokenize("struct a {\n  int x;\n}").unwrap();
        assert_eq!(tokens[0].loc, SourceLocation::new(1, 1));
        assert_eq!(tokens[3].loc, SourceLocation::new(2, 3));
    }
}
