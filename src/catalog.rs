//! 構造体カタログ
//!
//! 1つのソースに含まれる全ての struct / union を解析して名前で引けるようにする。
//! 定義ごとの解析失敗は記録して続行する。

use std::collections::HashMap;

use log::{debug, warn};

use crate::builder::build_model;
use crate::embedding::{StructLookup, resolve_embedding};
use crate::error::{CompileError, Result};
use crate::model::StructModel;
use crate::parser::{ParseConfig, SourceUnit};

/// 名前 -> 構造体モデル
#[derive(Debug, Clone, Default)]
pub struct StructCatalog {
    /// 最初の定義順
    models: Vec<StructModel>,
    index: HashMap<String, usize>,
    /// typedef 名 -> モデル
    aliases: HashMap<String, usize>,
    failures: Vec<(String, CompileError)>,
}

/// カタログの統計情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    pub structs: usize,
    pub fields: usize,
    pub guarded_fields: usize,
    pub failures: usize,
}

impl StructCatalog {
    /// 空のカタログを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// ソース全体を解析
    ///
    /// 字句エラーはソース全体に対して致命的。各定義は独立に解析され、
    /// 失敗した定義は `failures()` に残る。
    pub fn parse(source: &str, config: &ParseConfig) -> Result<Self> {
        let unit = SourceUnit::new(source, config)?;
        let mut catalog = Self::new();

        for def in unit.definitions() {
            match unit.parse_definition(def) {
                Ok(parsed) => {
                    let index = catalog.insert(build_model(parsed.decl));
                    if let (Some(index), Some(alias)) = (index, &def.alias) {
                        catalog.aliases.entry(alias.clone()).or_insert(index);
                    }
                    for nested in parsed.nested {
                        catalog.insert(build_model(nested));
                    }
                }
                Err(err) => {
                    warn!("{} {}: {}", def.kind.keyword(), def.name, err);
                    catalog.failures.push((def.name.clone(), err));
                }
            }
        }

        Ok(catalog)
    }

    /// モデルを追加
    ///
    /// 同名のモデルが既にあれば最初の定義を残し、`None` を返す。
    pub fn insert(&mut self, model: StructModel) -> Option<usize> {
        if self.index.contains_key(&model.name) {
            debug!("duplicate definition of {} ignored", model.name);
            return None;
        }
        let index = self.models.len();
        self.index.insert(model.name.clone(), index);
        self.models.push(model);
        Some(index)
    }

    /// 名前（タグ名または typedef 名）で検索
    pub fn get(&self, name: &str) -> Option<&StructModel> {
        self.index
            .get(name)
            .or_else(|| self.aliases.get(name))
            .map(|&i| &self.models[i])
    }

    /// 構造体名の一覧（定義順）
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.name.as_str())
    }

    pub fn models(&self) -> &[StructModel] {
        &self.models
    }

    /// 解析に失敗した定義
    pub fn failures(&self) -> &[(String, CompileError)] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// 全構造体の値埋め込み閉包
    pub fn embedding_table(&self) -> Vec<(String, Vec<String>)> {
        self.models
            .iter()
            .map(|m| (m.name.clone(), resolve_embedding(m, self)))
            .collect()
    }

    /// 埋め込み表をダンプ
    pub fn dump_embedding_table(&self) -> String {
        let mut result = String::new();
        for (name, embedded) in self.embedding_table() {
            result.push_str(&format!("{} -> {}\n", name, embedded.join(", ")));
        }
        result
    }

    /// 統計情報を取得
    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats {
            structs: self.models.len(),
            fields: 0,
            guarded_fields: 0,
            failures: self.failures.len(),
        };
        for model in &self.models {
            let s = model.stats();
            stats.fields += s.total_fields;
            stats.guarded_fields += s.guarded_fields;
        }
        stats
    }
}

impl StructLookup for StructCatalog {
    fn lookup(&self, name: &str) -> Option<&StructModel> {
        self.get(name)
    }
}
