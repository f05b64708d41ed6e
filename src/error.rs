use std::path::Path;

use thiserror::Error;

use crate::source::SourceLocation;

/// レキサーエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    /// 閉じられていないブロックコメント
    #[error("unterminated block comment")]
    UnterminatedComment,
    /// 閉じられていない文字列リテラル
    #[error("unterminated string literal")]
    UnterminatedString,
    /// 閉じられていない文字リテラル
    #[error("unterminated character literal")]
    UnterminatedChar,
    /// 不正な文字
    #[error("invalid character: {0:?}")]
    InvalidChar(char),
}

/// パースエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// 予期しないトークン
    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    /// 予期しないファイル終端
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// 指定された構造体定義が見つからない
    #[error("struct definition not found: {0}")]
    StructNotFound(String),
    /// ポインタでない関数型のメンバー
    #[error("member '{0}' has function type; only function pointers are allowed")]
    FunctionMember(String),
    /// ガードとして解釈できない条件式
    #[error("invalid conditional expression: {0}")]
    InvalidGuard(String),
}

/// 構造体本体のパースまでに発生する統合エラー型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// レキサーエラー
    #[error("{loc}: lexer error: {kind}")]
    Lex { loc: SourceLocation, kind: LexError },
    /// パースエラー
    #[error("{loc}: parse error: {kind}")]
    Parse { loc: SourceLocation, kind: ParseError },
    /// 構造体の閉じ括弧までに閉じない（または対応のない）条件ディレクティブ
    #[error("{loc}: unbalanced conditional: #{directive}")]
    UnbalancedConditional {
        loc: SourceLocation,
        directive: String,
    },
}

impl CompileError {
    /// エラーが発生した位置を取得
    pub fn loc(&self) -> &SourceLocation {
        match self {
            CompileError::Lex { loc, .. } => loc,
            CompileError::Parse { loc, .. } => loc,
            CompileError::UnbalancedConditional { loc, .. } => loc,
        }
    }

    /// ファイル名付きでエラーメッセージをフォーマット
    pub fn format_with_source(&self, path: &Path) -> String {
        format!("{}:{}", path.display(), self)
    }
}

/// 差分エンジンのエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// 異なる名前の構造体同士を比較しようとした
    #[error("cannot diff struct '{left}' against unrelated struct '{right}'")]
    MismatchedStructName { left: String, right: String },
}

/// Result型エイリアス
pub type Result<T> = std::result::Result<T, CompileError>;
