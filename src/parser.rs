//! 条件付きコンパイルを保持する構造体パーサ
//!
//! マクロを展開せず、`#if` 系ディレクティブを `DeclNode::Conditional` として
//! 残したまま struct / union 本体を宣言木に変換する。
//! 未知の型名はすべて不透明なスカラー型として受け入れるので、シンボル表は持たない。

use log::{debug, trace};

use crate::ast::{AggregateKind, DeclNode, FieldDecl, StructDecl, TypeExpr};
use crate::error::{CompileError, ParseError, Result};
use crate::guard::ConditionGuard;
use crate::lexer::tokenize;
use crate::source::SourceLocation;
use crate::token::{Directive, DirectiveKind, Token, TokenKind, join_tokens};

/// 既定で読み飛ばすカーネルの注釈マクロ
const KERNEL_ANNOTATIONS: &[&str] = &[
    "randomized_struct_fields_start",
    "randomized_struct_fields_end",
    "__rcu",
    "__user",
    "__percpu",
    "__iomem",
    "__force",
    "__private",
    "__randomize_layout",
    "__packed",
    "__aligned",
    "__attribute__",
    "__attribute",
    "____cacheline_aligned",
    "____cacheline_aligned_in_smp",
    "__cacheline_aligned",
    "__cacheline_aligned_in_smp",
    "_struct_page_alignment",
];

/// パーサ設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseConfig {
    /// レイアウトに影響しない注釈として読み飛ばす識別子
    ///
    /// 直後に括弧付きの引数が続いてもよい。
    pub annotations: Vec<String>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            annotations: KERNEL_ANNOTATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ParseConfig {
    /// 注釈を追加
    pub fn with_annotation(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.annotations.contains(&name) {
            self.annotations.push(name);
        }
        self
    }

    /// 注釈として読み飛ばす識別子か
    pub fn is_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a == name)
    }
}

/// トップレベルで見つかった struct / union 定義
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDefinition {
    /// タグ名、タグがなければ typedef 名
    pub name: String,
    pub kind: AggregateKind,
    pub tag: Option<String>,
    /// `typedef struct ... alias;` の別名
    pub alias: Option<String>,
    pub loc: SourceLocation,
    /// `{` のトークン位置
    body_start: usize,
    /// 対応する `}` のトークン位置（閉じていなければ Eof）
    body_end: usize,
}

impl StructDefinition {
    /// タグ名または別名が一致するか
    pub fn matches(&self, name: &str) -> bool {
        self.tag.as_deref() == Some(name) || self.alias.as_deref() == Some(name)
    }
}

/// 1つの定義を解析した結果
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStruct {
    pub decl: StructDecl,
    /// 本体の中で名前付きで定義された struct / union
    pub nested: Vec<StructDecl>,
}

/// 字句解析済みのソースと、その中の構造体定義一覧
#[derive(Debug, Clone)]
pub struct SourceUnit {
    tokens: Vec<Token>,
    definitions: Vec<StructDefinition>,
    config: ParseConfig,
}

impl SourceUnit {
    /// ソース全体を字句解析し、トップレベルの定義を探す
    ///
    /// 字句エラーはソース全体に対して致命的。
    pub fn new(source: &str, config: &ParseConfig) -> Result<Self> {
        let tokens = tokenize(source)?;
        let definitions = scan_definitions(&tokens, config);
        debug!("found {} struct/union definitions", definitions.len());
        Ok(Self {
            tokens,
            definitions,
            config: config.clone(),
        })
    }

    /// 見つかった定義（出現順）
    pub fn definitions(&self) -> &[StructDefinition] {
        &self.definitions
    }

    /// 名前で定義を探す
    pub fn find(&self, name: &str) -> Option<&StructDefinition> {
        self.definitions.iter().find(|d| d.matches(name))
    }

    /// 定義1つを解析
    pub fn parse_definition(&self, def: &StructDefinition) -> Result<ParsedStruct> {
        let tokens = &self.tokens[def.body_start..=def.body_end];
        let mut parser = StructParser::new(tokens, &self.config);
        let members = parser.parse_body()?;
        Ok(ParsedStruct {
            decl: StructDecl {
                name: def.name.clone(),
                kind: def.kind,
                members,
                loc: def.loc,
            },
            nested: parser.take_nested(),
        })
    }

    /// 名前を指定して解析
    ///
    /// トップレベルに見つからなければ、他の定義の中で名前付き定義されたものを探す。
    pub fn parse_named(&self, name: &str) -> Result<StructDecl> {
        if let Some(def) = self.find(name) {
            return Ok(self.parse_definition(def)?.decl);
        }

        for def in &self.definitions {
            if let Ok(parsed) = self.parse_definition(def) {
                if let Some(decl) = parsed.nested.into_iter().find(|d| d.name == name) {
                    return Ok(decl);
                }
            }
        }

        let loc = self.tokens.last().map(|t| t.loc).unwrap_or_default();
        Err(CompileError::Parse {
            loc,
            kind: ParseError::StructNotFound(name.to_string()),
        })
    }
}

/// ソーステキストから名前を指定して struct / union の宣言木を得る
pub fn parse_struct_decl(source: &str, name: &str, config: &ParseConfig) -> Result<StructDecl> {
    SourceUnit::new(source, config)?.parse_named(name)
}

/// 注釈とその引数を読み飛ばした位置を返す
fn skip_annotation_tokens(tokens: &[Token], mut i: usize, config: &ParseConfig) -> usize {
    while let Some(TokenKind::Ident(name)) = tokens.get(i).map(|t| &t.kind) {
        if !config.is_annotation(name) {
            break;
        }
        i += 1;
        if matches!(tokens.get(i).map(|t| &t.kind), Some(TokenKind::LParen)) {
            let mut depth = 0usize;
            while let Some(token) = tokens.get(i) {
                match token.kind {
                    TokenKind::LParen => depth += 1,
                    TokenKind::RParen => depth -= 1,
                    TokenKind::Eof => return i,
                    _ => {}
                }
                i += 1;
                if depth == 0 {
                    break;
                }
            }
        }
    }
    i
}

/// 対応する `}` の位置（なければ最後のトークン）
fn matching_brace(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::LBrace => depth += 1,
            TokenKind::RBrace => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
    }
    tokens.len().saturating_sub(1)
}

/// トップレベルの struct / union 定義を探す
///
/// 関数本体などの `{}` の内側は見ない。本体の後ろの `;` は必須ではない。
pub fn scan_definitions(tokens: &[Token], config: &ParseConfig) -> Vec<StructDefinition> {
    let mut defs = Vec::new();
    let mut depth = 0usize;
    let mut in_typedef = false;
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        match &token.kind {
            TokenKind::LBrace => depth += 1,
            TokenKind::RBrace => depth = depth.saturating_sub(1),
            TokenKind::Semi if depth == 0 => in_typedef = false,
            TokenKind::KwTypedef if depth == 0 => in_typedef = true,
            TokenKind::KwStruct | TokenKind::KwUnion if depth == 0 => {
                let kind = if token.kind == TokenKind::KwStruct {
                    AggregateKind::Struct
                } else {
                    AggregateKind::Union
                };
                let mut j = skip_annotation_tokens(tokens, i + 1, config);
                let tag = match tokens.get(j).map(|t| &t.kind) {
                    Some(TokenKind::Ident(name)) => {
                        j += 1;
                        Some(name.clone())
                    }
                    _ => None,
                };
                j = skip_annotation_tokens(tokens, j, config);

                if !matches!(tokens.get(j).map(|t| &t.kind), Some(TokenKind::LBrace)) {
                    // 前方宣言や型としての参照
                    i = j;
                    continue;
                }

                let body_end = matching_brace(tokens, j);
                let alias = if in_typedef {
                    let k = skip_annotation_tokens(tokens, body_end + 1, config);
                    match (
                        tokens.get(k).map(|t| &t.kind),
                        tokens.get(k + 1).map(|t| &t.kind),
                    ) {
                        (
                            Some(TokenKind::Ident(alias)),
                            Some(TokenKind::Semi) | Some(TokenKind::Comma),
                        ) => Some(alias.clone()),
                        _ => None,
                    }
                } else {
                    None
                };

                match tag.clone().or_else(|| alias.clone()) {
                    Some(name) => defs.push(StructDefinition {
                        name,
                        kind,
                        tag,
                        alias,
                        loc: token.loc,
                        body_start: j,
                        body_end,
                    }),
                    None => debug!("{}: skipping anonymous top-level {}", token.loc, kind.keyword()),
                }

                i = body_end + 1;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    defs
}

/// 型指定部の解析結果
enum BaseType {
    /// スカラー、本体なしの struct / union 参照、enum
    Plain(TypeExpr),
    /// 本体付きの無名 struct / union
    Anonymous(AggregateKind, Vec<DeclNode>),
    /// 本体付きの名前付き struct / union（別途登録済み）
    Defined(AggregateKind, String),
}

impl BaseType {
    fn to_type(&self) -> TypeExpr {
        match self {
            BaseType::Plain(ty) => ty.clone(),
            BaseType::Anonymous(kind, members) => TypeExpr::anonymous(*kind, members.clone()),
            BaseType::Defined(kind, name) => TypeExpr::named(*kind, name.clone()),
        }
    }
}

/// 宣言子の操作（基本型に近い順）
#[derive(Debug, Clone)]
enum DeclOp {
    Pointer,
    Array(Option<String>),
    Function(Vec<TypeExpr>),
}

/// 宣言子
struct Declarator {
    name: Option<String>,
    ops: Vec<DeclOp>,
}

/// 宣言子の操作を型に適用
fn apply_op(ty: TypeExpr, op: DeclOp) -> TypeExpr {
    match op {
        DeclOp::Pointer => match ty {
            TypeExpr::Function { ret, params } => TypeExpr::FunctionPointer { ret, params },
            other => TypeExpr::Pointer(Box::new(other)),
        },
        DeclOp::Array(dim) => match ty {
            TypeExpr::Array(inner, mut dims) => {
                dims.insert(0, dim);
                TypeExpr::Array(inner, dims)
            }
            other => TypeExpr::Array(Box::new(other), vec![dim]),
        },
        DeclOp::Function(params) => TypeExpr::Function {
            ret: Box::new(ty),
            params,
        },
    }
}

/// 構造体本体パーサ
pub struct StructParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    config: &'a ParseConfig,
    eof: Token,
    /// 本体の中で見つかった名前付き定義
    nested: Vec<StructDecl>,
}

impl<'a> StructParser<'a> {
    /// `{` から `}` までのトークン列に対するパーサを作成
    pub fn new(tokens: &'a [Token], config: &'a ParseConfig) -> Self {
        let eof_loc = tokens.last().map(|t| t.loc).unwrap_or_default();
        Self {
            tokens,
            pos: 0,
            config,
            eof: Token::new(TokenKind::Eof, eof_loc),
            nested: Vec::new(),
        }
    }

    /// 本体内の名前付き定義を取り出す
    pub fn take_nested(&mut self) -> Vec<StructDecl> {
        std::mem::take(&mut self.nested)
    }

    /// `{ ... }` を解析
    pub fn parse_body(&mut self) -> Result<Vec<DeclNode>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let members = self.parse_block()?;
        self.close_body()?;
        Ok(members)
    }

    /// 本体の閉じ括弧を確認
    fn close_body(&mut self) -> Result<()> {
        let current = self.current().clone();
        match &current.kind {
            TokenKind::RBrace => {
                self.advance();
                Ok(())
            }
            // 対応する #if のない #else / #elif / #endif
            TokenKind::Directive(d) => Err(CompileError::UnbalancedConditional {
                loc: current.loc,
                directive: directive_label(d),
            }),
            TokenKind::Eof => Err(CompileError::Parse {
                loc: current.loc,
                kind: ParseError::UnexpectedEof,
            }),
            _ => Err(self.unexpected("'}'")),
        }
    }

    /// `}` / `#else` / `#elif` / `#endif` / 終端までの宣言列
    fn parse_block(&mut self) -> Result<Vec<DeclNode>> {
        let mut nodes = Vec::new();
        loop {
            let current = self.current().clone();
            match &current.kind {
                TokenKind::RBrace | TokenKind::Eof => break,
                TokenKind::Directive(d) if d.kind.opens_conditional() => {
                    self.advance();
                    let guard = ConditionGuard::from_directive(d, current.loc)?;
                    trace!("{}: enter {}", current.loc, d);
                    nodes.push(self.parse_conditional(guard, current.loc, d)?);
                }
                TokenKind::Directive(d) => match &d.kind {
                    DirectiveKind::Other(_) => {
                        debug!("{}: skipping directive {}", current.loc, d);
                        self.advance();
                    }
                    // #else / #elif / #endif は呼び出し側で処理
                    _ => break,
                },
                TokenKind::Semi => {
                    self.advance();
                }
                _ => self.parse_member(&mut nodes)?,
            }
        }
        Ok(nodes)
    }

    /// 条件ブロックを解析（開きディレクティブは消費済み）
    ///
    /// `#elif` は else 側にネストした条件ブロックとなり、`#endif` を共有する。
    fn parse_conditional(
        &mut self,
        guard: ConditionGuard,
        loc: SourceLocation,
        opening: &Directive,
    ) -> Result<DeclNode> {
        let then_branch = self.parse_block()?;
        let current = self.current().clone();

        let else_branch = match &current.kind {
            TokenKind::Directive(d) if d.kind == DirectiveKind::Endif => {
                self.advance();
                Vec::new()
            }
            TokenKind::Directive(d) if d.kind == DirectiveKind::Elif => {
                self.advance();
                let elif_guard = ConditionGuard::from_directive(d, current.loc)?;
                trace!("{}: {}", current.loc, d);
                vec![self.parse_conditional(elif_guard, current.loc, d)?]
            }
            TokenKind::Directive(d) if d.kind == DirectiveKind::Else => {
                self.advance();
                let else_branch = self.parse_block()?;
                let closing = self.current().clone();
                match &closing.kind {
                    TokenKind::Directive(e) if e.kind == DirectiveKind::Endif => {
                        self.advance();
                    }
                    // #else の後の #else / #elif
                    TokenKind::Directive(e) => {
                        return Err(CompileError::UnbalancedConditional {
                            loc: closing.loc,
                            directive: directive_label(e),
                        });
                    }
                    _ => return Err(unclosed(loc, opening)),
                }
                else_branch
            }
            _ => return Err(unclosed(loc, opening)),
        };

        trace!("{}: leave {}", loc, opening);
        Ok(DeclNode::Conditional {
            guard,
            then_branch,
            else_branch,
            loc,
        })
    }

    /// メンバー宣言1文を解析
    fn parse_member(&mut self, nodes: &mut Vec<DeclNode>) -> Result<()> {
        self.skip_annotations()?;
        // 単独で置かれた注釈マクロ
        if matches!(
            self.current().kind,
            TokenKind::RBrace | TokenKind::Eof | TokenKind::Semi | TokenKind::Directive(_)
        ) {
            return Ok(());
        }
        let loc = self.current().loc;

        let base = self.parse_type_prefix()?;

        if self.check(&TokenKind::Semi) {
            self.advance();
            match base {
                BaseType::Anonymous(kind, members) => {
                    nodes.push(DeclNode::AnonymousAggregate { kind, members, loc });
                }
                BaseType::Defined(kind, name) => {
                    trace!("{}: definition of {} {}", loc, kind.keyword(), name);
                }
                BaseType::Plain(ty) => debug!("{}: declaration without declarator: {:?}", loc, ty),
            }
            return Ok(());
        }

        // 最初の宣言子は文の先頭、以降は各宣言子の位置
        let mut decl_loc = loc;
        loop {
            let declarator = self.parse_declarator(false)?;

            let bitfield = if self.check(&TokenKind::Colon) {
                self.advance();
                Some(self.parse_bitfield_width()?)
            } else {
                None
            };
            self.skip_annotations()?;

            let ty = declarator
                .ops
                .into_iter()
                .fold(base.to_type(), apply_op);

            let name = declarator.name;
            if matches!(ty, TypeExpr::Function { .. }) {
                return Err(CompileError::Parse {
                    loc: decl_loc,
                    kind: ParseError::FunctionMember(name.unwrap_or_default()),
                });
            }
            if name.is_none() && bitfield.is_none() {
                return Err(CompileError::Parse {
                    loc: decl_loc,
                    kind: ParseError::UnexpectedToken {
                        expected: "member name".to_string(),
                        found: self.current().kind.to_string(),
                    },
                });
            }

            nodes.push(DeclNode::Field(FieldDecl {
                name,
                ty,
                bitfield,
                loc: decl_loc,
            }));

            match self.current().kind {
                TokenKind::Comma => {
                    self.advance();
                    self.skip_annotations()?;
                    decl_loc = self.current().loc;
                }
                TokenKind::Semi => {
                    self.advance();
                    return Ok(());
                }
                _ => return Err(self.unexpected("',' or ';'")),
            }
        }
    }

    /// 型指定部（修飾子・基本型・typedef名・struct/union/enum 指定子）
    fn parse_type_prefix(&mut self) -> Result<BaseType> {
        let mut words: Vec<String> = Vec::new();
        let mut has_base = false;
        let mut aggregate: Option<BaseType> = None;

        loop {
            let kind = self.current().kind.clone();
            match &kind {
                TokenKind::KwTypedef => {
                    self.advance();
                }
                k if k.is_storage_class() => {
                    self.advance();
                }
                k if k.is_qualifier() => {
                    words.push(k.to_string());
                    self.advance();
                }
                k if k.is_base_type_keyword() => {
                    words.push(k.to_string());
                    has_base = true;
                    self.advance();
                }
                TokenKind::KwStruct | TokenKind::KwUnion if !has_base => {
                    aggregate = Some(self.parse_aggregate_spec()?);
                    has_base = true;
                }
                TokenKind::KwEnum if !has_base => {
                    words.push(self.parse_enum_spec()?);
                    has_base = true;
                }
                TokenKind::Ident(name) if self.config.is_annotation(name) => {
                    self.skip_annotations()?;
                }
                TokenKind::Ident(name) if !has_base => {
                    // typedef名・型マクロは不透明な名前として扱う
                    words.push(name.clone());
                    has_base = true;
                    self.advance();
                }
                _ => break,
            }
        }

        if let Some(aggregate) = aggregate {
            return Ok(aggregate);
        }
        if !has_base {
            return Err(self.unexpected("type specifier"));
        }
        Ok(BaseType::Plain(TypeExpr::Scalar(words.join(" "))))
    }

    /// struct / union 指定子
    fn parse_aggregate_spec(&mut self) -> Result<BaseType> {
        let kind = if self.check(&TokenKind::KwStruct) {
            AggregateKind::Struct
        } else {
            AggregateKind::Union
        };
        let loc = self.advance().loc;
        self.skip_annotations()?;

        let tag = match &self.current().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Some(name)
            }
            _ => None,
        };
        self.skip_annotations()?;

        if !self.check(&TokenKind::LBrace) {
            return match tag {
                Some(tag) => Ok(BaseType::Plain(TypeExpr::named(kind, tag))),
                None => Err(self.unexpected("struct tag or '{'")),
            };
        }

        let members = self.parse_body()?;
        self.skip_annotations()?;
        match tag {
            Some(tag) => {
                debug!("{}: nested definition {} {}", loc, kind.keyword(), tag);
                self.nested.push(StructDecl {
                    name: tag.clone(),
                    kind,
                    members,
                    loc,
                });
                Ok(BaseType::Defined(kind, tag))
            }
            None => Ok(BaseType::Anonymous(kind, members)),
        }
    }

    /// enum 指定子（本体は読み飛ばす）
    ///
    /// タグのない enum は `enum { }` と綴り、書き戻しても宣言子をタグと取り違えない。
    fn parse_enum_spec(&mut self) -> Result<String> {
        self.advance(); // enum
        self.skip_annotations()?;
        let tag = match &self.current().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Some(name)
            }
            _ => None,
        };
        if self.check(&TokenKind::LBrace) {
            self.skip_balanced(&TokenKind::LBrace, &TokenKind::RBrace, "'}'")?;
        } else if tag.is_none() {
            return Err(self.unexpected("enum tag or '{'"));
        }
        Ok(match tag {
            Some(tag) => format!("enum {}", tag),
            None => "enum { }".to_string(),
        })
    }

    /// 宣言子
    ///
    /// `in_params` のときは名前を省略した抽象宣言子も受け付ける。
    fn parse_declarator(&mut self, in_params: bool) -> Result<Declarator> {
        let mut pointers = 0;
        while self.check(&TokenKind::Star) {
            self.advance();
            pointers += 1;
            // * の後の修飾子・注釈
            loop {
                let kind = self.current().kind.clone();
                if kind.is_qualifier() {
                    self.advance();
                } else if matches!(&kind, TokenKind::Ident(n) if self.config.is_annotation(n)) {
                    self.skip_annotations()?;
                } else {
                    break;
                }
            }
        }

        let mut name = None;
        let mut inner_ops = Vec::new();
        match self.current().kind.clone() {
            TokenKind::Ident(id) => {
                name = Some(id);
                self.advance();
            }
            TokenKind::LParen if self.starts_nested_declarator(in_params) => {
                self.advance();
                let inner = self.parse_declarator(in_params)?;
                self.expect(&TokenKind::RParen, "')'")?;
                name = inner.name;
                inner_ops = inner.ops;
            }
            _ => {}
        }

        let mut suffixes = Vec::new();
        loop {
            match self.current().kind {
                TokenKind::LBracket => {
                    self.advance();
                    suffixes.push(DeclOp::Array(self.parse_array_size()?));
                }
                TokenKind::LParen => {
                    self.advance();
                    suffixes.push(DeclOp::Function(self.parse_params()?));
                }
                _ => break,
            }
        }

        let mut ops: Vec<DeclOp> = std::iter::repeat_n(DeclOp::Pointer, pointers).collect();
        ops.extend(suffixes.into_iter().rev());
        ops.extend(inner_ops);
        Ok(Declarator { name, ops })
    }

    /// `(` が括弧付きの宣言子を開くか（引数リストではなく）
    fn starts_nested_declarator(&self, in_params: bool) -> bool {
        match self.peek_kind(1) {
            TokenKind::Star | TokenKind::LParen | TokenKind::LBracket => true,
            TokenKind::Ident(name) => !in_params && !self.config.is_annotation(name),
            _ => false,
        }
    }

    /// 配列サイズ式（`[` は消費済み、`]` まで消費）
    fn parse_array_size(&mut self) -> Result<Option<String>> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.current().kind {
                TokenKind::LBracket => depth += 1,
                TokenKind::RBracket if depth == 0 => break,
                TokenKind::RBracket => depth -= 1,
                TokenKind::Eof | TokenKind::Semi | TokenKind::RBrace => {
                    return Err(self.unexpected("']'"));
                }
                _ => {}
            }
            self.advance();
        }
        let text = join_tokens(&self.tokens[start..self.pos]);
        self.advance(); // ]
        Ok(if text.is_empty() { None } else { Some(text) })
    }

    /// 関数型の引数リスト（`(` は消費済み、`)` まで消費）
    ///
    /// 引数名は記録せず、型のみ。
    fn parse_params(&mut self) -> Result<Vec<TypeExpr>> {
        let mut params = Vec::new();

        if self.check(&TokenKind::RParen) {
            self.advance();
            return Ok(params);
        }
        if self.check(&TokenKind::KwVoid) && matches!(self.peek_kind(1), TokenKind::RParen) {
            self.advance();
            self.advance();
            return Ok(params);
        }

        loop {
            if self.check(&TokenKind::Ellipsis) {
                self.advance();
                params.push(TypeExpr::Scalar("...".to_string()));
            } else {
                self.skip_annotations()?;
                let base = self.parse_type_prefix()?;
                let declarator = self.parse_declarator(true)?;
                self.skip_annotations()?;
                let ty = declarator.ops.into_iter().fold(base.to_type(), apply_op);
                // 関数型の引数は関数ポインタに読み替える
                let ty = match ty {
                    TypeExpr::Function { ret, params } => TypeExpr::FunctionPointer { ret, params },
                    other => other,
                };
                params.push(ty);
            }

            match self.current().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RParen => {
                    self.advance();
                    return Ok(params);
                }
                _ => return Err(self.unexpected("',' or ')'")),
            }
        }
    }

    /// ビットフィールド幅（`:` は消費済み）
    fn parse_bitfield_width(&mut self) -> Result<String> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.current().kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen if depth > 0 => depth -= 1,
                TokenKind::Comma | TokenKind::Semi if depth == 0 => break,
                TokenKind::Eof | TokenKind::RBrace | TokenKind::Directive(_) => break,
                _ => {}
            }
            self.advance();
        }
        let text = join_tokens(&self.tokens[start..self.pos]);
        if text.is_empty() {
            return Err(self.unexpected("bitfield width"));
        }
        Ok(text)
    }

    // ==================== ユーティリティ ====================

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn peek_kind(&self, n: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        let current = self.current();
        let kind = match current.kind {
            TokenKind::Eof => ParseError::UnexpectedEof,
            _ => ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: current.kind.to_string(),
            },
        };
        CompileError::Parse {
            loc: current.loc,
            kind,
        }
    }

    /// 注釈識別子と後続の括弧を読み飛ばす（複数連続も対応）
    fn skip_annotations(&mut self) -> Result<()> {
        while let TokenKind::Ident(name) = &self.current().kind {
            if !self.config.is_annotation(name) {
                break;
            }
            trace!("{}: skipping annotation {}", self.current().loc, name);
            self.advance();
            if self.check(&TokenKind::LParen) {
                self.skip_balanced(&TokenKind::LParen, &TokenKind::RParen, "')'")?;
            }
        }
        Ok(())
    }

    /// 開き括弧から対応する閉じ括弧までを読み飛ばす
    fn skip_balanced(&mut self, open: &TokenKind, close: &TokenKind, expected: &str) -> Result<()> {
        let mut depth = 0usize;
        loop {
            if self.check(open) {
                depth += 1;
            } else if self.check(close) {
                depth -= 1;
            } else if self.check(&TokenKind::Eof) {
                return Err(self.unexpected(expected));
            }
            self.advance();
            if depth == 0 {
                return Ok(());
            }
        }
    }
}

/// エラー表示用のディレクティブ（`#` なし）
fn directive_label(directive: &Directive) -> String {
    directive.to_string().trim_start_matches('#').to_string()
}

fn unclosed(loc: SourceLocation, opening: &Directive) -> CompileError {
    CompileError::UnbalancedConditional {
        loc,
        directive: directive_label(opening),
    }
}
