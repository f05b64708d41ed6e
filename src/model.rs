//! 構造体モデル
//!
//! 宣言木を平坦化したフィールド列。差分エンジンと埋め込み解析は
//! このモデルだけを入力とし、トークンや元のテキストには触れない。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::AggregateKind;
use crate::guard::{ConditionGuard, SymbolAssignment};
use crate::source::SourceLocation;

/// フィールドの型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeDescriptor {
    /// 基本型・typedef名・enum など（不透明な名前）
    Scalar(String),
    Pointer(Box<TypeDescriptor>),
    /// 要素型と各次元のサイズ式（外側から）
    Array(Box<TypeDescriptor>, Vec<Option<String>>),
    /// 引数は型のみ
    FunctionPointer {
        ret: Box<TypeDescriptor>,
        params: Vec<TypeDescriptor>,
    },
    NamedStruct(String),
    NamedUnion(String),
    /// インラインの無名 struct（フィールドのガードは集約型からの相対）
    AnonymousStruct(Vec<Field>),
    AnonymousUnion(Vec<Field>),
}

impl TypeDescriptor {
    /// C の宣言として描画
    ///
    /// `declarator` は名前（と既に付いた修飾）で、空なら型名のみになる。
    /// `indent` を与えるとインライン集約型を複数行で、ガード付きで書く。
    fn render(&self, declarator: String, indent: Option<usize>) -> String {
        match self {
            TypeDescriptor::Scalar(name) => join_declarator(name, &declarator),
            TypeDescriptor::NamedStruct(name) => {
                join_declarator(&format!("struct {}", name), &declarator)
            }
            TypeDescriptor::NamedUnion(name) => {
                join_declarator(&format!("union {}", name), &declarator)
            }
            TypeDescriptor::AnonymousStruct(fields) => {
                join_declarator(&render_aggregate("struct", fields, indent), &declarator)
            }
            TypeDescriptor::AnonymousUnion(fields) => {
                join_declarator(&render_aggregate("union", fields, indent), &declarator)
            }
            TypeDescriptor::Pointer(inner) => {
                let declarator = if matches!(**inner, TypeDescriptor::Array(..)) {
                    format!("(*{})", declarator)
                } else {
                    format!("*{}", declarator)
                };
                inner.render(declarator, indent)
            }
            TypeDescriptor::Array(inner, dims) => {
                let mut declarator = declarator;
                for dim in dims {
                    declarator.push('[');
                    declarator.push_str(dim.as_deref().unwrap_or(""));
                    declarator.push(']');
                }
                inner.render(declarator, indent)
            }
            TypeDescriptor::FunctionPointer { ret, params } => {
                let params = if params.is_empty() {
                    "void".to_string()
                } else {
                    params
                        .iter()
                        .map(|p| p.render(String::new(), indent))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                ret.render(format!("(*{})({})", declarator, params), indent)
            }
        }
    }

    /// 名前付きで C の宣言として描画
    pub fn declaration(&self, name: &str) -> String {
        self.render(name.to_string(), None)
    }

    /// 値として埋め込まれる名前付き struct / union の名前
    pub fn aggregate_name(&self) -> Option<&str> {
        match self {
            TypeDescriptor::NamedStruct(name) | TypeDescriptor::NamedUnion(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(String::new(), None))
    }
}

fn join_declarator(base: &str, declarator: &str) -> String {
    if declarator.is_empty() || declarator.starts_with('[') {
        format!("{}{}", base, declarator)
    } else {
        format!("{} {}", base, declarator)
    }
}

fn render_aggregate(keyword: &str, fields: &[Field], indent: Option<usize>) -> String {
    match indent {
        None => {
            let body: String = fields
                .iter()
                .map(|f| format!(" {};", f.declaration(None)))
                .collect();
            format!("{} {{{} }}", keyword, body)
        }
        Some(level) => {
            let mut out = format!("{} {{\n", keyword);
            write_fields(&mut out, fields, level + 1);
            out.push_str(&"    ".repeat(level));
            out.push('}');
            out
        }
    }
}

/// フィールド列を1行1宣言で書き出す（ガード付きは #if / #endif で囲む）
fn write_fields(out: &mut String, fields: &[Field], level: usize) {
    let pad = "    ".repeat(level);
    for field in fields {
        if !field.guard.is_always() {
            out.push_str(&format!("#if {}\n", field.guard));
        }
        out.push_str(&format!("{}{};\n", pad, field.declaration(Some(level))));
        if !field.guard.is_always() {
            out.push_str("#endif\n");
        }
    }
}

/// 構造体のフィールド
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    /// 名前のないビットフィールドでは None
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
    pub guard: ConditionGuard,
    pub loc: SourceLocation,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bitfield: Option<String>,
}

impl Field {
    /// 無条件のフィールドを作成
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: Some(name.into()),
            ty,
            guard: ConditionGuard::Always,
            loc: SourceLocation::default(),
            bitfield: None,
        }
    }

    pub fn with_guard(mut self, guard: ConditionGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_bitfield(mut self, width: impl Into<String>) -> Self {
        self.bitfield = Some(width.into());
        self
    }

    /// 差分・表示に使う名前（無名ビットフィールドは型の表記）
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.ty.to_string(),
        }
    }

    /// ガードを除いた C の宣言（末尾の `;` なし）
    fn declaration(&self, indent: Option<usize>) -> String {
        let mut decl = self
            .ty
            .render(self.name.clone().unwrap_or_default(), indent);
        if let Some(width) = &self.bitfield {
            decl.push_str(" : ");
            decl.push_str(width);
        }
        decl
    }
}

/// 位置情報は比較しない
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.ty == other.ty
            && self.guard == other.guard
            && self.bitfield == other.bitfield
    }
}

impl Eq for Field {}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.declaration(None))?;
        if !self.guard.is_always() {
            write!(f, " [if {}]", self.guard)?;
        }
        Ok(())
    }
}

/// 平坦化された構造体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructModel {
    pub name: String,
    pub kind: AggregateKind,
    pub fields: Vec<Field>,
}

/// モデルの統計情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStats {
    pub total_fields: usize,
    /// 無条件でないフィールドの数
    pub guarded_fields: usize,
    /// ガードが参照する設定シンボル（出現順）
    pub symbols: Vec<String>,
}

impl StructModel {
    pub fn new(name: impl Into<String>, kind: AggregateKind, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            kind,
            fields,
        }
    }

    /// 名前でフィールドを探す（最初の出現）
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name.as_deref() == Some(name))
    }

    /// C の定義として書き出す
    ///
    /// ガード付きのフィールドは `#if` / `#endif` で囲む。再解析すると同じフィールド列になる。
    pub fn to_source(&self) -> String {
        let mut out = format!("{} {} {{\n", self.kind.keyword(), self.name);
        write_fields(&mut out, &self.fields, 1);
        out.push_str("};\n");
        out
    }

    /// 割り当ての下で確実に存在しないフィールドを除いたモデル
    ///
    /// 残ったフィールドのガードはそのまま保持する。
    pub fn project(&self, assignment: &SymbolAssignment) -> StructModel {
        StructModel {
            name: self.name.clone(),
            kind: self.kind,
            fields: project_fields(&self.fields, assignment),
        }
    }

    /// 統計情報
    pub fn stats(&self) -> ModelStats {
        let mut stats = ModelStats {
            total_fields: self.fields.len(),
            ..Default::default()
        };
        for field in &self.fields {
            if field.guard.is_always() {
                continue;
            }
            stats.guarded_fields += 1;
            for sym in field.guard.symbols() {
                if !stats.symbols.contains(&sym) {
                    stats.symbols.push(sym);
                }
            }
        }
        stats
    }

    /// 統計情報をダンプ
    pub fn dump_stats(&self) -> String {
        let stats = self.stats();
        let mut out = format!(
            "{} {}: {} fields, {} guarded\n",
            self.kind.keyword(),
            self.name,
            stats.total_fields,
            stats.guarded_fields
        );
        for sym in &stats.symbols {
            out.push_str(&format!("  {}\n", sym));
        }
        out
    }
}

fn project_fields(fields: &[Field], assignment: &SymbolAssignment) -> Vec<Field> {
    fields
        .iter()
        .filter(|f| !f.guard.is_excluded_by(assignment))
        .map(|f| {
            let ty = project_type(&f.ty, assignment);
            Field { ty, ..f.clone() }
        })
        .collect()
}

fn project_type(ty: &TypeDescriptor, assignment: &SymbolAssignment) -> TypeDescriptor {
    match ty {
        TypeDescriptor::AnonymousStruct(fields) => {
            TypeDescriptor::AnonymousStruct(project_fields(fields, assignment))
        }
        TypeDescriptor::AnonymousUnion(fields) => {
            TypeDescriptor::AnonymousUnion(project_fields(fields, assignment))
        }
        TypeDescriptor::Array(inner, dims) => {
            TypeDescriptor::Array(Box::new(project_type(inner, assignment)), dims.clone())
        }
        other => other.clone(),
    }
}
