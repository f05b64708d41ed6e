//! 構造体差分エンジン
//!
//! 同じ構造体の2つの版をフィールド単位で比較する。
//! フィールドは (名前, 同名内の出現順) で対応付け、型・ビットフィールド幅・ガードを比べる。
//! 並び替えは共通フィールドの最長共通部分列から外れたものとして報告する。

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DiffError;
use crate::guard::{ConditionGuard, SymbolAssignment};
use crate::model::{Field, StructModel, TypeDescriptor};

/// 差分の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Added,
    Removed,
    TypeChanged,
    BitfieldChanged,
    GuardChanged,
    Reordered,
}

/// フィールド単位の差分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffEntry {
    Added {
        field: String,
        #[serde(rename = "type")]
        ty: TypeDescriptor,
        guard: ConditionGuard,
    },
    Removed {
        field: String,
        #[serde(rename = "type")]
        ty: TypeDescriptor,
        guard: ConditionGuard,
    },
    TypeChanged {
        field: String,
        old: TypeDescriptor,
        new: TypeDescriptor,
    },
    BitfieldChanged {
        field: String,
        old: Option<String>,
        new: Option<String>,
    },
    GuardChanged {
        field: String,
        old: ConditionGuard,
        new: ConditionGuard,
    },
    /// 添字は共通フィールドの中での位置
    Reordered {
        field: String,
        old_index: usize,
        new_index: usize,
    },
}

impl DiffEntry {
    pub fn kind(&self) -> DiffKind {
        match self {
            DiffEntry::Added { .. } => DiffKind::Added,
            DiffEntry::Removed { .. } => DiffKind::Removed,
            DiffEntry::TypeChanged { .. } => DiffKind::TypeChanged,
            DiffEntry::BitfieldChanged { .. } => DiffKind::BitfieldChanged,
            DiffEntry::GuardChanged { .. } => DiffKind::GuardChanged,
            DiffEntry::Reordered { .. } => DiffKind::Reordered,
        }
    }

    /// 対象フィールド名
    pub fn field(&self) -> &str {
        match self {
            DiffEntry::Added { field, .. }
            | DiffEntry::Removed { field, .. }
            | DiffEntry::TypeChanged { field, .. }
            | DiffEntry::BitfieldChanged { field, .. }
            | DiffEntry::GuardChanged { field, .. }
            | DiffEntry::Reordered { field, .. } => field,
        }
    }
}

fn guard_suffix(guard: &ConditionGuard) -> String {
    if guard.is_always() {
        String::new()
    } else {
        format!(" [if {}]", guard)
    }
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffEntry::Added { field, ty, guard } => {
                write!(f, "+ {}{}", ty.declaration(field), guard_suffix(guard))
            }
            DiffEntry::Removed { field, ty, guard } => {
                write!(f, "- {}{}", ty.declaration(field), guard_suffix(guard))
            }
            DiffEntry::TypeChanged { field, old, new } => {
                write!(f, "~ {}: type {} -> {}", field, old, new)
            }
            DiffEntry::BitfieldChanged { field, old, new } => write!(
                f,
                "~ {}: bitfield {} -> {}",
                field,
                old.as_deref().unwrap_or("none"),
                new.as_deref().unwrap_or("none")
            ),
            DiffEntry::GuardChanged { field, old, new } => {
                write!(f, "~ {}: guard {} -> {}", field, old, new)
            }
            DiffEntry::Reordered {
                field,
                old_index,
                new_index,
            } => write!(f, "~ {}: moved {} -> {}", field, old_index, new_index),
        }
    }
}

/// 対応付けのキー: (ラベル, 同じラベル内での出現順)
type FieldKey = (String, usize);

fn field_keys(fields: &[Field]) -> Vec<FieldKey> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    fields
        .iter()
        .map(|f| {
            let label = f.label();
            let count = seen.entry(label.clone()).or_insert(0);
            let key = (label, *count);
            *count += 1;
            key
        })
        .collect()
}

/// 最長共通部分列に含まれるキー
fn lcs_keys(left: &[&FieldKey], right: &[&FieldKey]) -> HashSet<FieldKey> {
    let (n, m) = (left.len(), right.len());
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if left[i] == right[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut result = HashSet::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if left[i] == right[j] {
            result.insert(left[i].clone());
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    result
}

/// 2つの版の構造体を比較
///
/// 左の宣言順に Removed / TypeChanged / BitfieldChanged / GuardChanged / Reordered、
/// その後に右の宣言順で Added を並べる。名前の異なる構造体同士は比較しない。
/// 両側とも同じ種類の無名集成体を型に持つメンバーは中身を再帰的に比較し、
/// `inner.b` のようにドット区切りの名前で報告する。
pub fn diff_structs(left: &StructModel, right: &StructModel) -> Result<Vec<DiffEntry>, DiffError> {
    if left.name != right.name {
        return Err(DiffError::MismatchedStructName {
            left: left.name.clone(),
            right: right.name.clone(),
        });
    }

    let mut entries = Vec::new();
    diff_fields("", &left.fields, &right.fields, &mut entries);
    Ok(entries)
}

/// 同じ種類の無名集成体なら両側のメンバー列
fn inline_members<'a>(
    left: &'a TypeDescriptor,
    right: &'a TypeDescriptor,
) -> Option<(&'a [Field], &'a [Field])> {
    match (left, right) {
        (TypeDescriptor::AnonymousStruct(l), TypeDescriptor::AnonymousStruct(r))
        | (TypeDescriptor::AnonymousUnion(l), TypeDescriptor::AnonymousUnion(r)) => {
            Some((l.as_slice(), r.as_slice()))
        }
        _ => None,
    }
}

fn diff_fields(prefix: &str, left: &[Field], right: &[Field], entries: &mut Vec<DiffEntry>) {
    let left_keys = field_keys(left);
    let right_keys = field_keys(right);
    let left_pos: HashMap<&FieldKey, usize> =
        left_keys.iter().enumerate().map(|(i, k)| (k, i)).collect();
    let right_pos: HashMap<&FieldKey, usize> =
        right_keys.iter().enumerate().map(|(i, k)| (k, i)).collect();

    let shared_left: Vec<&FieldKey> = left_keys
        .iter()
        .filter(|k| right_pos.contains_key(k))
        .collect();
    let shared_right: Vec<&FieldKey> = right_keys
        .iter()
        .filter(|k| left_pos.contains_key(k))
        .collect();
    let stable = lcs_keys(&shared_left, &shared_right);
    let shared_right_index: HashMap<&FieldKey, usize> = shared_right
        .iter()
        .enumerate()
        .map(|(i, k)| (*k, i))
        .collect();

    let mut shared_left_index = 0;

    for (key, lf) in left_keys.iter().zip(left) {
        let name = format!("{}{}", prefix, key.0);
        let Some(&j) = right_pos.get(key) else {
            entries.push(DiffEntry::Removed {
                field: name,
                ty: lf.ty.clone(),
                guard: lf.guard.clone(),
            });
            continue;
        };
        let rf = &right[j];

        if let Some((l, r)) = inline_members(&lf.ty, &rf.ty) {
            diff_fields(&format!("{}.", name), l, r, entries);
        } else if lf.ty != rf.ty {
            entries.push(DiffEntry::TypeChanged {
                field: name.clone(),
                old: lf.ty.clone(),
                new: rf.ty.clone(),
            });
        }
        if lf.bitfield != rf.bitfield {
            entries.push(DiffEntry::BitfieldChanged {
                field: name.clone(),
                old: lf.bitfield.clone(),
                new: rf.bitfield.clone(),
            });
        }
        if lf.guard != rf.guard {
            entries.push(DiffEntry::GuardChanged {
                field: name.clone(),
                old: lf.guard.clone(),
                new: rf.guard.clone(),
            });
        }
        if !stable.contains(key) {
            entries.push(DiffEntry::Reordered {
                field: name,
                old_index: shared_left_index,
                new_index: shared_right_index.get(key).copied().unwrap_or_default(),
            });
        }
        shared_left_index += 1;
    }

    for (key, rf) in right_keys.iter().zip(right) {
        if !left_pos.contains_key(key) {
            entries.push(DiffEntry::Added {
                field: format!("{}{}", prefix, key.0),
                ty: rf.ty.clone(),
                guard: rf.guard.clone(),
            });
        }
    }
}

/// 割り当てを与えた場合、両方のモデルを射影してから比較する
pub fn diff_structs_with(
    left: &StructModel,
    right: &StructModel,
    assignment: Option<&SymbolAssignment>,
) -> Result<Vec<DiffEntry>, DiffError> {
    match assignment {
        Some(assignment) => diff_structs(&left.project(assignment), &right.project(assignment)),
        None => diff_structs(left, right),
    }
}

/// 出力用に分類した差分
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub added: Vec<DiffEntry>,
    pub removed: Vec<DiffEntry>,
    /// 型・ビットフィールド・ガードの変更と並び替え
    pub changed: Vec<DiffEntry>,
}

impl DiffReport {
    pub fn from_entries(entries: Vec<DiffEntry>) -> Self {
        let mut report = DiffReport::default();
        for entry in entries {
            match entry.kind() {
                DiffKind::Added => report.added.push(entry),
                DiffKind::Removed => report.removed.push(entry),
                _ => report.changed.push(entry),
            }
        }
        report
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}
