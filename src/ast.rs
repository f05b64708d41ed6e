//! 構造体本体の宣言木
//!
//! パーサが出力し、モデルビルダが平坦化する。条件ディレクティブは
//! 展開せず `DeclNode::Conditional` として残す。

use serde::{Deserialize, Serialize};

use crate::guard::ConditionGuard;
use crate::source::SourceLocation;

/// 構造体か共用体か
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    Struct,
    Union,
}

impl AggregateKind {
    /// C のキーワード
    pub fn keyword(&self) -> &'static str {
        match self {
            AggregateKind::Struct => "struct",
            AggregateKind::Union => "union",
        }
    }
}

/// 宣言木のノード
#[derive(Debug, Clone, PartialEq)]
pub enum DeclNode {
    /// メンバー宣言（1宣言子につき1つ）
    Field(FieldDecl),
    /// #if / #else / #endif ブロック
    ///
    /// #elif は else 側にネストした Conditional として表す。
    Conditional {
        guard: ConditionGuard,
        then_branch: Vec<DeclNode>,
        else_branch: Vec<DeclNode>,
        loc: SourceLocation,
    },
    /// 名前のない struct / union メンバー（親に展開される）
    AnonymousAggregate {
        kind: AggregateKind,
        members: Vec<DeclNode>,
        loc: SourceLocation,
    },
}

/// メンバー宣言
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    /// 名前のないビットフィールドでは None
    pub name: Option<String>,
    pub ty: TypeExpr,
    /// ビットフィールド幅（字面のまま）
    pub bitfield: Option<String>,
    pub loc: SourceLocation,
}

/// 宣言子を適用した型
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// 基本型・typedef名など
    Scalar(String),
    Pointer(Box<TypeExpr>),
    /// 要素型と各次元のサイズ式（外側から）
    Array(Box<TypeExpr>, Vec<Option<String>>),
    /// 関数型（宣言子の途中でのみ現れる）
    Function {
        ret: Box<TypeExpr>,
        params: Vec<TypeExpr>,
    },
    FunctionPointer {
        ret: Box<TypeExpr>,
        params: Vec<TypeExpr>,
    },
    NamedStruct(String),
    NamedUnion(String),
    AnonymousStruct(Vec<DeclNode>),
    AnonymousUnion(Vec<DeclNode>),
}

impl TypeExpr {
    /// 集約型の本体を持つ無名型を作成
    pub fn anonymous(kind: AggregateKind, members: Vec<DeclNode>) -> TypeExpr {
        match kind {
            AggregateKind::Struct => TypeExpr::AnonymousStruct(members),
            AggregateKind::Union => TypeExpr::AnonymousUnion(members),
        }
    }

    /// 名前付き集約型を作成
    pub fn named(kind: AggregateKind, name: impl Into<String>) -> TypeExpr {
        match kind {
            AggregateKind::Struct => TypeExpr::NamedStruct(name.into()),
            AggregateKind::Union => TypeExpr::NamedUnion(name.into()),
        }
    }
}

/// 1つの構造体定義の解析結果
#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub kind: AggregateKind,
    pub members: Vec<DeclNode>,
    pub loc: SourceLocation,
}
