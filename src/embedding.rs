//! 値埋め込み解析
//!
//! 構造体が値として（ポインタを介さずに）含む struct / union を推移的に集める。
//! レイアウトに影響しうる型の集合を求めるのに使う。

use std::collections::{BTreeMap, HashMap, HashSet};

use log::trace;

use crate::guard::SymbolAssignment;
use crate::model::{Field, StructModel, TypeDescriptor};

/// 構造体名からモデルを引く
///
/// 解析中は読み取り専用として扱う。
pub trait StructLookup {
    fn lookup(&self, name: &str) -> Option<&StructModel>;
}

impl StructLookup for HashMap<String, StructModel> {
    fn lookup(&self, name: &str) -> Option<&StructModel> {
        self.get(name)
    }
}

impl StructLookup for BTreeMap<String, StructModel> {
    fn lookup(&self, name: &str) -> Option<&StructModel> {
        self.get(name)
    }
}

/// 埋め込み閉包を求める状態
struct EmbeddingResolver<'a, L: StructLookup + ?Sized> {
    lookup: &'a L,
    assignment: Option<&'a SymbolAssignment>,
    visited: HashSet<String>,
    result: Vec<String>,
}

impl<'a, L: StructLookup + ?Sized> EmbeddingResolver<'a, L> {
    fn is_present(&self, field: &Field) -> bool {
        match self.assignment {
            Some(assignment) => !field.guard.is_excluded_by(assignment),
            None => true,
        }
    }

    fn visit_fields(&mut self, fields: &[Field]) {
        for field in fields {
            if self.is_present(field) {
                self.visit_type(&field.ty);
            }
        }
    }

    fn visit_type(&mut self, ty: &TypeDescriptor) {
        if let Some(name) = ty.aggregate_name() {
            self.visit_named(name);
            return;
        }
        match ty {
            // 配列の要素は値として含まれる
            TypeDescriptor::Array(inner, _) => self.visit_type(inner),
            TypeDescriptor::AnonymousStruct(fields) | TypeDescriptor::AnonymousUnion(fields) => {
                self.visit_fields(fields)
            }
            // ポインタの先はレイアウトに影響しない
            TypeDescriptor::Pointer(_)
            | TypeDescriptor::FunctionPointer { .. }
            | TypeDescriptor::Scalar(_) => {}
            TypeDescriptor::NamedStruct(_) | TypeDescriptor::NamedUnion(_) => {}
        }
    }

    fn visit_named(&mut self, name: &str) {
        if !self.visited.insert(name.to_string()) {
            return;
        }
        self.result.push(name.to_string());
        let lookup = self.lookup;
        match lookup.lookup(name) {
            Some(model) => {
                trace!("descending into {}", name);
                self.visit_fields(&model.fields);
            }
            None => trace!("{} is not in the lookup; kept as leaf", name),
        }
    }
}

/// 値埋め込みされた struct / union 名を、最初に見つかった順で返す
///
/// ポインタ経由でしか到達しない構造体は含まない。ルート自身は含まない。
/// lookup にない名前も結果には含めるが、その先は辿らない。
pub fn resolve_embedding<L: StructLookup + ?Sized>(root: &StructModel, lookup: &L) -> Vec<String> {
    resolve_embedding_with(root, lookup, None)
}

/// 割り当てを与えた場合、確実に存在しないフィールドはどの階層でも無視する
pub fn resolve_embedding_with<L: StructLookup + ?Sized>(
    root: &StructModel,
    lookup: &L,
    assignment: Option<&SymbolAssignment>,
) -> Vec<String> {
    let mut resolver = EmbeddingResolver {
        lookup,
        assignment,
        visited: HashSet::from([root.name.clone()]),
        result: Vec::new(),
    };
    resolver.visit_fields(&root.fields);
    resolver.result
}
