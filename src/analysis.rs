//! 解析パイプライン
//!
//! ソーステキスト（またはファイル）から構造体を取り出し、2つの版の比較や
//! 値埋め込み閉包の計算までをまとめて行う。CLI から利用する。

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::StructCatalog;
use crate::diff::{DiffEntry, DiffReport, diff_structs_with};
use crate::embedding::resolve_embedding_with;
use crate::error::{CompileError, DiffError, ParseError};
use crate::guard::SymbolAssignment;
use crate::model::StructModel;
use crate::parser::ParseConfig;
use crate::parse_struct_with;

/// 解析の設定
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    /// パーサ設定
    pub parse: ParseConfig,

    /// 呼び出し側が与える設定シンボルの真偽
    /// 省略時は全ての構成の和として扱う
    pub assignment: Option<SymbolAssignment>,

    /// 差分の各項目を info レベルで出力
    pub verbose: bool,
}

/// AnalysisConfigのビルダー
#[derive(Debug, Default)]
pub struct AnalysisBuilder {
    config: AnalysisConfig,
}

impl AnalysisBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 既存のParseConfigを使用
    pub fn parse_config(mut self, config: ParseConfig) -> Self {
        self.config.parse = config;
        self
    }

    /// 読み飛ばす注釈を追加
    pub fn annotation(mut self, name: impl Into<String>) -> Self {
        self.config.parse = self.config.parse.with_annotation(name);
        self
    }

    /// シンボルを真とする
    pub fn define(mut self, name: impl Into<String>) -> Self {
        self.config
            .assignment
            .get_or_insert_with(SymbolAssignment::new)
            .set(name, true);
        self
    }

    /// シンボルを偽とする
    pub fn undefine(mut self, name: impl Into<String>) -> Self {
        self.config
            .assignment
            .get_or_insert_with(SymbolAssignment::new)
            .set(name, false);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// 設定を構築
    pub fn build(self) -> AnalysisConfig {
        self.config
    }
}

/// パイプラインのエラー
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// 入力ファイルの読み込み失敗
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// 字句・構文エラー（origin はファイル名など入力の名前）
    #[error("{origin}:{error}")]
    Compile {
        origin: String,
        #[source]
        error: CompileError,
    },
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalysisError {
    fn compile(origin: &str, error: CompileError) -> Self {
        AnalysisError::Compile {
            origin: origin.to_string(),
            error,
        }
    }
}

/// 2つの版の比較結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    pub left: StructModel,
    pub right: StructModel,
    pub entries: Vec<DiffEntry>,
}

impl Comparison {
    /// 種類ごとに分類した差分
    pub fn report(&self) -> DiffReport {
        DiffReport::from_entries(self.entries.clone())
    }
}

/// ファイルを読み込む
pub fn read_source(path: &Path) -> Result<String, AnalysisError> {
    fs::read_to_string(path).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// ソースから構造体モデルを1つ取り出す
pub fn load_model(
    source: &str,
    origin: &str,
    name: &str,
    config: &AnalysisConfig,
) -> Result<StructModel, AnalysisError> {
    let model = parse_struct_with(source, name, &config.parse)
        .map_err(|e| AnalysisError::compile(origin, e))?;
    for line in model.dump_stats().lines() {
        debug!("{}: {}", origin, line);
    }
    Ok(model)
}

fn compare_named(
    (left_origin, left_source): (&str, &str),
    (right_origin, right_source): (&str, &str),
    name: &str,
    config: &AnalysisConfig,
) -> Result<Comparison, AnalysisError> {
    info!("comparing {} between {} and {}", name, left_origin, right_origin);

    let left = load_model(left_source, left_origin, name, config)?;
    let right = load_model(right_source, right_origin, name, config)?;
    let entries = diff_structs_with(&left, &right, config.assignment.as_ref())?;

    info!("{}: {} differences", name, entries.len());
    for entry in &entries {
        if config.verbose {
            info!("{}", entry);
        } else {
            debug!("{}", entry);
        }
    }

    Ok(Comparison {
        left,
        right,
        entries,
    })
}

/// 2つのソーステキストで同名の構造体を比較
pub fn compare_sources(
    left: &str,
    right: &str,
    name: &str,
    config: &AnalysisConfig,
) -> Result<Comparison, AnalysisError> {
    compare_named(("left", left), ("right", right), name, config)
}

/// 2つのファイルで同名の構造体を比較
pub fn compare_files(
    left: &Path,
    right: &Path,
    name: &str,
    config: &AnalysisConfig,
) -> Result<Comparison, AnalysisError> {
    let left_source = read_source(left)?;
    let right_source = read_source(right)?;
    let left_origin = left.display().to_string();
    let right_origin = right.display().to_string();
    compare_named(
        (&left_origin, &left_source),
        (&right_origin, &right_source),
        name,
        config,
    )
}

/// ソース中の構造体が値として埋め込む struct / union 名
///
/// ソース内の全ての定義を lookup として使う。
pub fn embedded_structs(
    source: &str,
    root: &str,
    config: &AnalysisConfig,
) -> Result<Vec<String>, AnalysisError> {
    embedded_structs_in(source, "input", root, config)
}

/// `embedded_structs` のエラーに入力名を付ける版
pub fn embedded_structs_in(
    source: &str,
    origin: &str,
    root: &str,
    config: &AnalysisConfig,
) -> Result<Vec<String>, AnalysisError> {
    let catalog =
        StructCatalog::parse(source, &config.parse).map_err(|e| AnalysisError::compile(origin, e))?;
    info!(
        "{}: {} structs parsed, {} failed",
        origin,
        catalog.len(),
        catalog.failures().len()
    );

    let Some(model) = catalog.get(root) else {
        // ルート自体の解析失敗はそのエラーを返す
        if let Some((_, err)) = catalog.failures().iter().find(|(name, _)| name == root) {
            return Err(AnalysisError::compile(origin, err.clone()));
        }
        return Err(AnalysisError::compile(
            origin,
            CompileError::Parse {
                loc: Default::default(),
                kind: ParseError::StructNotFound(root.to_string()),
            },
        ));
    };

    let embedded = resolve_embedding_with(model, &catalog, config.assignment.as_ref());
    info!("{} embeds {} structs by value", root, embedded.len());
    Ok(embedded)
}
