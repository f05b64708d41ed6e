use std::fmt;

use crate::source::SourceLocation;

/// プリプロセッサディレクティブの種別
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveKind {
    If,
    Ifdef,
    Ifndef,
    Elif,
    Else,
    Endif,
    /// 条件ディレクティブ以外（#define, #pragma, #include, 空の # など）
    Other(String),
}

impl DirectiveKind {
    /// ディレクティブ名から種別を判定
    pub fn from_keyword(s: &str) -> DirectiveKind {
        match s {
            "if" => DirectiveKind::If,
            "ifdef" => DirectiveKind::Ifdef,
            "ifndef" => DirectiveKind::Ifndef,
            "elif" => DirectiveKind::Elif,
            "else" => DirectiveKind::Else,
            "endif" => DirectiveKind::Endif,
            other => DirectiveKind::Other(other.to_string()),
        }
    }

    /// ディレクティブ名
    pub fn keyword(&self) -> &str {
        match self {
            DirectiveKind::If => "if",
            DirectiveKind::Ifdef => "ifdef",
            DirectiveKind::Ifndef => "ifndef",
            DirectiveKind::Elif => "elif",
            DirectiveKind::Else => "else",
            DirectiveKind::Endif => "endif",
            DirectiveKind::Other(s) => s,
        }
    }

    /// #if / #ifdef / #ifndef のいずれか
    pub fn opens_conditional(&self) -> bool {
        matches!(
            self,
            DirectiveKind::If | DirectiveKind::Ifdef | DirectiveKind::Ifndef
        )
    }
}

/// 1行分のディレクティブ（継続行は結合済み、コメントは除去済み）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// ディレクティブ名以降の残りテキスト
    pub rest: String,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rest.is_empty() {
            write!(f, "#{}", self.kind.keyword())
        } else {
            write!(f, "#{} {}", self.kind.keyword(), self.rest)
        }
    }
}

/// トークン種別
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // === リテラル（字面のまま保持し、値は解釈しない） ===
    /// 数値リテラル
    Number(String),
    /// 文字リテラル
    CharLit(String),
    /// 文字列リテラル
    StringLit(String),

    // === 識別子 ===
    Ident(String),

    // === キーワード ===
    // ストレージクラス
    KwAuto,
    KwExtern,
    KwRegister,
    KwStatic,
    KwTypedef,
    KwInline,
    // 型指定子
    KwChar,
    KwDouble,
    KwFloat,
    KwInt,
    KwLong,
    KwShort,
    KwSigned,
    KwUnsigned,
    KwVoid,
    KwBool,
    KwComplex,
    // 型修飾子
    KwConst,
    KwVolatile,
    KwRestrict,
    KwAtomic,
    // 構造体・共用体・列挙
    KwStruct,
    KwUnion,
    KwEnum,

    // === 演算子 ===
    Plus,       // +
    Minus,      // -
    Star,       // *
    Slash,      // /
    Percent,    // %
    Amp,        // &
    Pipe,       // |
    Caret,      // ^
    Tilde,      // ~
    LtLt,       // <<
    GtGt,       // >>
    Bang,       // !
    AmpAmp,     // &&
    PipePipe,   // ||
    Lt,         // <
    Gt,         // >
    LtEq,       // <=
    GtEq,       // >=
    EqEq,       // ==
    BangEq,     // !=
    Eq,         // =
    Question,   // ?
    Colon,      // :
    Arrow,      // ->
    Dot,        // .
    Ellipsis,   // ...

    // === 区切り記号 ===
    Comma,      // ,
    Semi,       // ;
    LParen,     // (
    RParen,     // )
    LBracket,   // [
    RBracket,   // ]
    LBrace,     // {
    RBrace,     // }

    // 行頭以外の # / ##
    Hash,
    HashHash,

    // === プリプロセッサ ===
    /// 行頭の # から始まるディレクティブ行全体
    Directive(Directive),

    /// 入力終端
    Eof,
}

impl TokenKind {
    /// キーワード文字列からTokenKindへの変換
    pub fn from_keyword(s: &str) -> Option<TokenKind> {
        match s {
            "auto" => Some(TokenKind::KwAuto),
            "extern" => Some(TokenKind::KwExtern),
            "register" => Some(TokenKind::KwRegister),
            "static" => Some(TokenKind::KwStatic),
            "typedef" => Some(TokenKind::KwTypedef),
            "inline" | "__inline" | "__inline__" => Some(TokenKind::KwInline),
            "char" => Some(TokenKind::KwChar),
            "double" => Some(TokenKind::KwDouble),
            "float" => Some(TokenKind::KwFloat),
            "int" => Some(TokenKind::KwInt),
            "long" => Some(TokenKind::KwLong),
            "short" => Some(TokenKind::KwShort),
            "signed" | "__signed__" => Some(TokenKind::KwSigned),
            "unsigned" => Some(TokenKind::KwUnsigned),
            "void" => Some(TokenKind::KwVoid),
            "_Bool" => Some(TokenKind::KwBool),
            "_Complex" => Some(TokenKind::KwComplex),
            "const" | "__const" | "__const__" => Some(TokenKind::KwConst),
            "volatile" | "__volatile" | "__volatile__" => Some(TokenKind::KwVolatile),
            "restrict" | "__restrict" | "__restrict__" => Some(TokenKind::KwRestrict),
            "_Atomic" => Some(TokenKind::KwAtomic),
            "struct" => Some(TokenKind::KwStruct),
            "union" => Some(TokenKind::KwUnion),
            "enum" => Some(TokenKind::KwEnum),
            _ => None,
        }
    }

    /// 基本型を構成するキーワードか
    pub fn is_base_type_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::KwChar
                | TokenKind::KwDouble
                | TokenKind::KwFloat
                | TokenKind::KwInt
                | TokenKind::KwLong
                | TokenKind::KwShort
                | TokenKind::KwSigned
                | TokenKind::KwUnsigned
                | TokenKind::KwVoid
                | TokenKind::KwBool
                | TokenKind::KwComplex
        )
    }

    /// 型修飾子キーワードか
    pub fn is_qualifier(&self) -> bool {
        matches!(
            self,
            TokenKind::KwConst | TokenKind::KwVolatile | TokenKind::KwRestrict | TokenKind::KwAtomic
        )
    }

    /// ストレージクラス（型には残さないキーワード）か
    pub fn is_storage_class(&self) -> bool {
        matches!(
            self,
            TokenKind::KwAuto
                | TokenKind::KwExtern
                | TokenKind::KwRegister
                | TokenKind::KwStatic
                | TokenKind::KwInline
        )
    }

    /// 識別子またはキーワード（語として連結時に空白が必要なもの）か
    pub fn is_word(&self) -> bool {
        match self {
            TokenKind::Ident(_) | TokenKind::Number(_) => true,
            TokenKind::CharLit(_) | TokenKind::StringLit(_) => false,
            other => other.keyword_text().is_some(),
        }
    }

    /// キーワードであればその綴りを返す
    fn keyword_text(&self) -> Option<&'static str> {
        let s = match self {
            TokenKind::KwAuto => "auto",
            TokenKind::KwExtern => "extern",
            TokenKind::KwRegister => "register",
            TokenKind::KwStatic => "static",
            TokenKind::KwTypedef => "typedef",
            TokenKind::KwInline => "inline",
            TokenKind::KwChar => "char",
            TokenKind::KwDouble => "double",
            TokenKind::KwFloat => "float",
            TokenKind::KwInt => "int",
            TokenKind::KwLong => "long",
            TokenKind::KwShort => "short",
            TokenKind::KwSigned => "signed",
            TokenKind::KwUnsigned => "unsigned",
            TokenKind::KwVoid => "void",
            TokenKind::KwBool => "_Bool",
            TokenKind::KwComplex => "_Complex",
            TokenKind::KwConst => "const",
            TokenKind::KwVolatile => "volatile",
            TokenKind::KwRestrict => "restrict",
            TokenKind::KwAtomic => "_Atomic",
            TokenKind::KwStruct => "struct",
            TokenKind::KwUnion => "union",
            TokenKind::KwEnum => "enum",
            _ => return None,
        };
        Some(s)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kw) = self.keyword_text() {
            return f.write_str(kw);
        }
        let s: &str = match self {
            TokenKind::Number(s) | TokenKind::CharLit(s) | TokenKind::StringLit(s) => s,
            TokenKind::Ident(s) => s,
            TokenKind::Directive(d) => return write!(f, "{}", d),
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::LtLt => "<<",
            TokenKind::GtGt => ">>",
            TokenKind::Bang => "!",
            TokenKind::AmpAmp => "&&",
            TokenKind::PipePipe => "||",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::EqEq => "==",
            TokenKind::BangEq => "!=",
            TokenKind::Eq => "=",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::Arrow => "->",
            TokenKind::Dot => ".",
            TokenKind::Ellipsis => "...",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Hash => "#",
            TokenKind::HashHash => "##",
            TokenKind::Eof => "end of input",
            _ => "",
        };
        f.write_str(s)
    }
}

/// 位置情報付きトークン
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: SourceLocation,
}

impl Token {
    /// 新しいトークンを作成
    pub fn new(kind: TokenKind, loc: SourceLocation) -> Self {
        Self { kind, loc }
    }
}

/// トークン列を空白を最小限にして文字列へ戻す
///
/// 配列サイズやビットフィールド幅など、値を解釈しない式の字面を保持するのに使う。
pub fn join_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev_word = false;
    for token in tokens {
        let word = token.kind.is_word();
        if prev_word && word {
            out.push(' ');
        }
        out.push_str(&token.kind.to_string());
        prev_word = word;
    }
    out
}
