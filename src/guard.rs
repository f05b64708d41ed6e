//! 条件ガード
//!
//! #if / #ifdef / #ifndef / #elif の条件を評価せずに式木として保持する。
//! 呼び出し側が `SymbolAssignment` を与えた場合のみ三値評価を行う。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, ParseError, Result};
use crate::lexer::tokenize;
use crate::source::SourceLocation;
use crate::token::{Directive, DirectiveKind, Token, TokenKind};

/// フィールドを囲む条件式
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionGuard {
    /// 無条件
    Always,
    /// defined(X)
    Defined(String),
    /// #if X のような裸のシンボル
    Symbol(String),
    /// 真偽の組み合わせとして読めない部分式（比較、算術、マクロ呼び出しなど）
    Opaque(String),
    Not(Box<ConditionGuard>),
    And(Box<ConditionGuard>, Box<ConditionGuard>),
    Or(Box<ConditionGuard>, Box<ConditionGuard>),
}

impl ConditionGuard {
    /// 否定
    pub fn negate(self) -> ConditionGuard {
        ConditionGuard::Not(Box::new(self))
    }

    /// 論理積（Always は単位元として扱う）
    pub fn and(self, other: ConditionGuard) -> ConditionGuard {
        match (self, other) {
            (ConditionGuard::Always, g) | (g, ConditionGuard::Always) => g,
            (l, r) => ConditionGuard::And(Box::new(l), Box::new(r)),
        }
    }

    /// 論理和
    pub fn or(self, other: ConditionGuard) -> ConditionGuard {
        ConditionGuard::Or(Box::new(self), Box::new(other))
    }

    /// ガード列を左結合の論理積にまとめる
    ///
    /// 空の列は `Always`。
    pub fn conjoin<'g, I>(guards: I) -> ConditionGuard
    where
        I: IntoIterator<Item = &'g ConditionGuard>,
    {
        guards
            .into_iter()
            .fold(ConditionGuard::Always, |acc, g| acc.and(g.clone()))
    }

    /// 無条件か
    pub fn is_always(&self) -> bool {
        matches!(self, ConditionGuard::Always)
    }

    /// 条件ディレクティブからガードを作成
    ///
    /// `#ifdef X` は `defined(X)`、`#ifndef X` は `!defined(X)`、
    /// `#if` / `#elif` は式として解析する。
    pub fn from_directive(directive: &Directive, loc: SourceLocation) -> Result<ConditionGuard> {
        let invalid = || CompileError::Parse {
            loc,
            kind: ParseError::InvalidGuard(directive.to_string()),
        };

        match &directive.kind {
            DirectiveKind::Ifdef | DirectiveKind::Ifndef => {
                let name = directive
                    .rest
                    .split_whitespace()
                    .next()
                    .filter(|s| is_identifier(s))
                    .ok_or_else(invalid)?;
                let guard = ConditionGuard::Defined(name.to_string());
                if directive.kind == DirectiveKind::Ifndef {
                    Ok(guard.negate())
                } else {
                    Ok(guard)
                }
            }
            DirectiveKind::If | DirectiveKind::Elif => {
                parse_condition(&directive.rest).map_err(|kind| CompileError::Parse { loc, kind })
            }
            _ => Err(invalid()),
        }
    }

    /// ガードが参照する設定シンボル（出現順、重複なし）
    pub fn symbols(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut Vec<String>) {
        match self {
            ConditionGuard::Always | ConditionGuard::Opaque(_) => {}
            ConditionGuard::Defined(s) | ConditionGuard::Symbol(s) => {
                if !out.contains(s) {
                    out.push(s.clone());
                }
            }
            ConditionGuard::Not(inner) => inner.collect_symbols(out),
            ConditionGuard::And(l, r) | ConditionGuard::Or(l, r) => {
                l.collect_symbols(out);
                r.collect_symbols(out);
            }
        }
    }

    /// 三値評価
    ///
    /// 未割り当てのシンボルや解釈できない部分式を含み、結果が決まらない場合は `None`。
    pub fn evaluate(&self, assignment: &SymbolAssignment) -> Option<bool> {
        match self {
            ConditionGuard::Always => Some(true),
            ConditionGuard::Defined(s) | ConditionGuard::Symbol(s) => assignment.get(s),
            ConditionGuard::Opaque(text) => match text.as_str() {
                "0" => Some(false),
                "1" => Some(true),
                _ => None,
            },
            ConditionGuard::Not(inner) => inner.evaluate(assignment).map(|v| !v),
            ConditionGuard::And(l, r) => match (l.evaluate(assignment), r.evaluate(assignment)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            ConditionGuard::Or(l, r) => match (l.evaluate(assignment), r.evaluate(assignment)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        }
    }

    /// 割り当ての下で確実に偽となるか（フィールドが存在しない）
    pub fn is_excluded_by(&self, assignment: &SymbolAssignment) -> bool {
        self.evaluate(assignment) == Some(false)
    }

    /// 表示時の結合強度
    fn precedence(&self) -> u8 {
        match self {
            ConditionGuard::Or(..) => 1,
            ConditionGuard::And(..) => 2,
            _ => 3,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parenthesize: bool) -> fmt::Result {
        if parenthesize {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for ConditionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionGuard::Always => f.write_str("1"),
            ConditionGuard::Defined(s) => write!(f, "defined({})", s),
            ConditionGuard::Symbol(s) | ConditionGuard::Opaque(s) => f.write_str(s),
            ConditionGuard::Not(inner) => {
                f.write_str("!")?;
                inner.fmt_operand(f, inner.precedence() < 3)
            }
            ConditionGuard::And(l, r) | ConditionGuard::Or(l, r) => {
                let prec = self.precedence();
                let op = if prec == 1 { " || " } else { " && " };
                // 左結合なので右側は同順位でも括弧が必要
                l.fmt_operand(f, l.precedence() < prec)?;
                f.write_str(op)?;
                r.fmt_operand(f, r.precedence() <= prec)
            }
        }
    }
}

impl FromStr for ConditionGuard {
    type Err = ParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_condition(s)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `#if` 条件式のテキストをガードに変換
pub fn parse_condition(text: &str) -> std::result::Result<ConditionGuard, ParseError> {
    let invalid = || ParseError::InvalidGuard(text.to_string());

    let tokens = tokenize(text).map_err(|_| invalid())?;
    let mut parser = GuardParser { tokens: &tokens, pos: 0 };
    let guard = parser.logical_or().ok_or_else(invalid)?;
    if !matches!(parser.current_kind(), TokenKind::Eof) {
        return Err(invalid());
    }
    Ok(guard)
}

/// ガード式パーサ
///
/// `!` `&&` `||` 括弧 `defined` のみを構造として読み、
/// それ以外はトークン字面のまま `Opaque` にする。
struct GuardParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> GuardParser<'a> {
    /// 現在のトークン種別を取得
    fn current_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    /// 次へ進む
    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    /// 部分式の区切りか
    fn at_boundary(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::AmpAmp | TokenKind::PipePipe | TokenKind::RParen | TokenKind::Eof
        )
    }

    /// 論理OR
    fn logical_or(&mut self) -> Option<ConditionGuard> {
        let mut left = self.logical_and()?;
        while matches!(self.current_kind(), TokenKind::PipePipe) {
            self.advance();
            let right = self.logical_and()?;
            left = left.or(right);
        }
        Some(left)
    }

    /// 論理AND
    fn logical_and(&mut self) -> Option<ConditionGuard> {
        let mut left = self.unary()?;
        while matches!(self.current_kind(), TokenKind::AmpAmp) {
            self.advance();
            let right = self.unary()?;
            left = ConditionGuard::And(Box::new(left), Box::new(right));
        }
        Some(left)
    }

    /// 単項式
    ///
    /// 構造として読んだ直後が区切りでなければ、先頭まで戻って不透明な原子として読み直す。
    fn unary(&mut self) -> Option<ConditionGuard> {
        let start = self.pos;
        let kind = self.current_kind().clone();
        let structured = match &kind {
            TokenKind::Bang => {
                self.advance();
                self.unary().map(ConditionGuard::negate)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.logical_or();
                if matches!(self.current_kind(), TokenKind::RParen) {
                    self.advance();
                    inner
                } else {
                    None
                }
            }
            TokenKind::Ident(name) if name == "defined" => {
                self.advance();
                self.defined_operand()
            }
            _ => None,
        };

        match structured {
            Some(guard) if self.at_boundary() => Some(guard),
            _ => {
                self.pos = start;
                self.atom()
            }
        }
    }

    /// defined X / defined(X) の被演算子
    fn defined_operand(&mut self) -> Option<ConditionGuard> {
        let parenthesized = matches!(self.current_kind(), TokenKind::LParen);
        if parenthesized {
            self.advance();
        }
        let TokenKind::Ident(name) = self.current_kind().clone() else {
            return None;
        };
        self.advance();
        if parenthesized {
            if !matches!(self.current_kind(), TokenKind::RParen) {
                return None;
            }
            self.advance();
        }
        Some(ConditionGuard::Defined(name))
    }

    /// 原子: 深さ0の `&&` `||` `)` まで
    fn atom(&mut self) -> Option<ConditionGuard> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.current_kind() {
                TokenKind::Eof => break,
                TokenKind::AmpAmp | TokenKind::PipePipe if depth == 0 => break,
                TokenKind::RParen if depth == 0 => break,
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth -= 1,
                _ => {}
            }
            self.advance();
        }

        match &self.tokens[start..self.pos] {
            [] => None,
            [token] => match &token.kind {
                TokenKind::Ident(name) => Some(ConditionGuard::Symbol(name.clone())),
                other => Some(ConditionGuard::Opaque(other.to_string())),
            },
            tokens => Some(ConditionGuard::Opaque(source_spelling(tokens))),
        }
    }
}

/// トークン列を書かれたときの間隔で綴り直す
///
/// 桁が離れているか行が変わったトークンの間には空白を1つ置く。
fn source_spelling(tokens: &[Token]) -> String {
    let mut text = String::new();
    let mut prev_end: Option<(u32, usize)> = None;
    for token in tokens {
        let spelled = token.kind.to_string();
        let column = token.loc.column as usize;
        if let Some((line, end)) = prev_end {
            if line != token.loc.line || column > end {
                text.push(' ');
            }
        }
        text.push_str(&spelled);
        prev_end = Some((token.loc.line, column + spelled.len()));
    }
    text
}

/// 設定シンボルの真偽割り当て
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolAssignment {
    values: HashMap<String, bool>,
}

impl SymbolAssignment {
    /// 空の割り当てを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// シンボルを真にする
    pub fn define(mut self, name: impl Into<String>) -> Self {
        self.values.insert(name.into(), true);
        self
    }

    /// シンボルを偽にする
    pub fn undefine(mut self, name: impl Into<String>) -> Self {
        self.values.insert(name.into(), false);
        self
    }

    /// 値を設定
    pub fn set(&mut self, name: impl Into<String>, value: bool) {
        self.values.insert(name.into(), value);
    }

    /// 値を取得
    pub fn get(&self, name: &str) -> Option<bool> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, bool)> for SymbolAssignment {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defined(s: &str) -> ConditionGuard {
        ConditionGuard::Defined(s.to_string())
    }

    fn directive(kind: DirectiveKind, rest: &str) -> Directive {
        Directive {
            kind,
            rest: rest.to_string(),
        }
    }

    #[test]
    fn test_ifdef_ifndef() {
        let loc = SourceLocation::default();
        let g = ConditionGuard::from_directive(&directive(DirectiveKind::Ifdef, "CONFIG_SMP"), loc)
            .unwrap();
        assert_eq!(g, defined("CONFIG_SMP"));

        let g = ConditionGuard::from_directive(&directive(DirectiveKind::Ifndef, "CONFIG_SMP"), loc)
            .unwrap();
        assert_eq!(g, defined("CONFIG_SMP").negate());
        assert_eq!(g.to_string(), "!defined(CONFIG_SMP)");
    }

    #[test]
    fn test_ifdef_without_name() {
        let err = ConditionGuard::from_directive(
            &directive(DirectiveKind::Ifdef, ""),
            SourceLocation::new(4, 1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::Parse { kind: ParseError::InvalidGuard(_), .. }
        ));
    }

    #[test]
    fn test_parse_logical() {
        let g: ConditionGuard = "defined(A) && !defined B || C".parse().unwrap();
        assert_eq!(
            g,
            ConditionGuard::Or(
                Box::new(ConditionGuard::And(
                    Box::new(defined("A")),
                    Box::new(defined("B").negate()),
                )),
                Box::new(ConditionGuard::Symbol("C".to_string())),
            )
        );
        assert_eq!(g.to_string(), "defined(A) && !defined(B) || C");
    }

    #[test]
    fn test_opaque_atoms() {
        let g: ConditionGuard = "IS_ENABLED(CONFIG_X) && BITS_PER_LONG == 64".parse().unwrap();
        assert_eq!(
            g,
            ConditionGuard::And(
                Box::new(ConditionGuard::Opaque("IS_ENABLED(CONFIG_X)".to_string())),
                Box::new(ConditionGuard::Opaque("BITS_PER_LONG == 64".to_string())),
            )
        );
        assert!(g.symbols().is_empty());
    }

    #[test]
    fn test_parenthesized_arithmetic_is_opaque() {
        let g: ConditionGuard = "(A) + 1".parse().unwrap();
        assert_eq!(g, ConditionGuard::Opaque("(A) + 1".to_string()));
    }

    #[test]
    fn test_opaque_keeps_source_spacing() {
        let g: ConditionGuard = "BITS_PER_LONG == 64".parse().unwrap();
        assert_eq!(g.to_string(), "BITS_PER_LONG == 64");

        let g: ConditionGuard = "IS_ENABLED(CONFIG_X)&&X>1".parse().unwrap();
        assert_eq!(g.to_string(), "IS_ENABLED(CONFIG_X) && X>1");

        let g: ConditionGuard = "CONFIG_NR_CPUS  >\n    4".parse().unwrap();
        assert_eq!(g.to_string(), "CONFIG_NR_CPUS > 4");
    }

    #[test]
    fn test_display_reparses_to_same_tree() {
        for text in [
            "A && (B || C)",
            "(A || B) && C",
            "A || (B || C)",
            "!(defined(A) && B)",
            "defined(X) && (Y > 2 || !Z)",
        ] {
            let g: ConditionGuard = text.parse().unwrap();
            let again: ConditionGuard = g.to_string().parse().unwrap();
            assert_eq!(g, again, "{}", text);
        }
    }

    #[test]
    fn test_invalid_expression() {
        assert!("A &&".parse::<ConditionGuard>().is_err());
        assert!("(A".parse::<ConditionGuard>().is_err());
        assert!("".parse::<ConditionGuard>().is_err());
    }

    #[test]
    fn test_conjoin() {
        let guards = vec![defined("A"), defined("B"), defined("C")];
        let g = ConditionGuard::conjoin(&guards);
        assert_eq!(g.to_string(), "defined(A) && defined(B) && defined(C)");
        assert_eq!(ConditionGuard::conjoin(&[]), ConditionGuard::Always);
    }

    #[test]
    fn test_symbols_deduplicated() {
        let g: ConditionGuard = "defined(A) && (A || B)".parse().unwrap();
        assert_eq!(g.symbols(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_evaluate_three_valued() {
        let g: ConditionGuard = "defined(A) && B".parse().unwrap();
        let empty = SymbolAssignment::new();
        assert_eq!(g.evaluate(&empty), None);

        let a_false = SymbolAssignment::new().undefine("A");
        assert_eq!(g.evaluate(&a_false), Some(false));
        assert!(g.is_excluded_by(&a_false));

        let both = SymbolAssignment::new().define("A").define("B");
        assert_eq!(g.evaluate(&both), Some(true));

        let not_a = defined("A").negate();
        assert_eq!(not_a.evaluate(&both), Some(false));
        assert_eq!(ConditionGuard::Opaque("0".to_string()).evaluate(&empty), Some(false));
        assert_eq!(ConditionGuard::Opaque("X > 1".to_string()).evaluate(&both), None);
    }
}
