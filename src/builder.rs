//! 構造体モデルビルダ
//!
//! 宣言木を前順に辿り、条件ブロックのガードをスタックに積みながら
//! フィールド列へ平坦化する。無名の struct / union メンバーは
//! 親の位置にそのまま展開される。

use log::trace;

use crate::ast::{DeclNode, FieldDecl, StructDecl, TypeExpr};
use crate::guard::ConditionGuard;
use crate::model::{Field, StructModel, TypeDescriptor};

/// ガードスタックを持つビルダ
#[derive(Debug, Default)]
pub struct ModelBuilder {
    stack: Vec<ConditionGuard>,
    fields: Vec<Field>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 宣言列を処理してフィールドを追加
    pub fn visit(&mut self, nodes: Vec<DeclNode>) {
        for node in nodes {
            match node {
                DeclNode::Field(decl) => {
                    let field = self.make_field(decl);
                    self.fields.push(field);
                }
                DeclNode::Conditional {
                    guard,
                    then_branch,
                    else_branch,
                    loc,
                } => {
                    trace!("{}: then-branch of #if {}", loc, guard);
                    self.stack.push(guard.clone());
                    self.visit(then_branch);
                    self.stack.pop();

                    if !else_branch.is_empty() {
                        self.stack.push(guard.negate());
                        self.visit(else_branch);
                        self.stack.pop();
                    }
                }
                // 無名集約型はガードを追加せず展開する
                DeclNode::AnonymousAggregate { members, .. } => self.visit(members),
            }
        }
    }

    /// 現在のスタックの論理積
    fn current_guard(&self) -> ConditionGuard {
        ConditionGuard::conjoin(&self.stack)
    }

    fn make_field(&self, decl: FieldDecl) -> Field {
        Field {
            name: decl.name,
            ty: convert_type(decl.ty),
            guard: self.current_guard(),
            loc: decl.loc,
            bitfield: decl.bitfield,
        }
    }

    /// 構築したフィールド列
    pub fn finish(self) -> Vec<Field> {
        self.fields
    }
}

/// インライン集約型の本体（ガードは集約型からの相対）
fn build_inline(members: Vec<DeclNode>) -> Vec<Field> {
    let mut builder = ModelBuilder::new();
    builder.visit(members);
    builder.finish()
}

fn convert_type(ty: TypeExpr) -> TypeDescriptor {
    match ty {
        TypeExpr::Scalar(name) => TypeDescriptor::Scalar(name),
        TypeExpr::Pointer(inner) => TypeDescriptor::Pointer(Box::new(convert_type(*inner))),
        TypeExpr::Array(inner, dims) => TypeDescriptor::Array(Box::new(convert_type(*inner)), dims),
        // 関数型のメンバーはパーサで弾かれるので、ここに来るのは引数位置のみ
        TypeExpr::Function { ret, params } | TypeExpr::FunctionPointer { ret, params } => {
            TypeDescriptor::FunctionPointer {
                ret: Box::new(convert_type(*ret)),
                params: params.into_iter().map(convert_type).collect(),
            }
        }
        TypeExpr::NamedStruct(name) => TypeDescriptor::NamedStruct(name),
        TypeExpr::NamedUnion(name) => TypeDescriptor::NamedUnion(name),
        TypeExpr::AnonymousStruct(members) => TypeDescriptor::AnonymousStruct(build_inline(members)),
        TypeExpr::AnonymousUnion(members) => TypeDescriptor::AnonymousUnion(build_inline(members)),
    }
}

/// 宣言木から構造体モデルを構築
///
/// 解析に成功した宣言木からは常に構築できる。
pub fn build_model(decl: StructDecl) -> StructModel {
    let mut builder = ModelBuilder::new();
    builder.visit(decl.members);
    StructModel::new(decl.name, decl.kind, builder.finish())
}
