//! cstruct-diff
//!
//! マクロを展開せずに C の struct 定義を解析し、条件付きコンパイルのガードを
//! 保持したままフィールド列のモデルを作る。モデルに対して、2つの版の
//! フィールド単位の差分と、値として埋め込まれた構造体の閉包を計算する。
//!
//! ```
//! use cstruct_diff::{diff_structs, parse_struct};
//!
//! let left = parse_struct("struct s { int a; };", "s").unwrap();
//! let right = parse_struct("struct s { int a; long b; };", "s").unwrap();
//! let entries = diff_structs(&left, &right).unwrap();
//! assert_eq!(entries.len(), 1);
//! ```

pub mod analysis;
pub mod ast;
pub mod builder;
pub mod catalog;
pub mod diff;
pub mod embedding;
pub mod error;
pub mod guard;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod source;
pub mod token;

// 主要な型を再エクスポート
pub use analysis::{
    AnalysisBuilder, AnalysisConfig, AnalysisError, Comparison, compare_files, compare_sources,
    embedded_structs,
};
pub use ast::AggregateKind;
pub use builder::build_model;
pub use catalog::StructCatalog;
pub use diff::{DiffEntry, DiffKind, DiffReport, diff_structs, diff_structs_with};
pub use embedding::{StructLookup, resolve_embedding, resolve_embedding_with};
pub use error::{CompileError, DiffError, LexError, ParseError, Result};
pub use guard::{ConditionGuard, SymbolAssignment};
pub use lexer::Lexer;
pub use model::{Field, ModelStats, StructModel, TypeDescriptor};
pub use parser::ParseConfig;
pub use source::SourceLocation;
pub use token::{Token, TokenKind};

/// ソーステキストから名前を指定して構造体モデルを得る（既定のパーサ設定）
pub fn parse_struct(source: &str, name: &str) -> Result<StructModel> {
    parse_struct_with(source, name, &ParseConfig::default())
}

/// パーサ設定を指定して構造体モデルを得る
pub fn parse_struct_with(source: &str, name: &str, config: &ParseConfig) -> Result<StructModel> {
    let decl = parser::parse_struct_decl(source, name, config)?;
    Ok(build_model(decl))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_struct_pipeline() {
        let source = "struct vtime {\n#ifdef DEF\n    seqcount_t seqcount;\n#endif\n    u64 gtime;\n};";
        let model = parse_struct(source, "vtime").unwrap();
        assert_eq!(model.fields.len(), 2);
        assert_eq!(
            model.fields[0].guard,
            ConditionGuard::Defined("DEF".to_string())
        );
        assert_eq!(model.fields[0].loc, SourceLocation::new(3, 5));
        assert!(model.fields[1].guard.is_always());
    }

    #[test]
    fn test_parse_struct_with_custom_annotation() {
        let source = "struct s { int a __my_tag(3); };";
        assert!(parse_struct(source, "s").is_err());
        let config = ParseConfig::default().with_annotation("__my_tag");
        let model = parse_struct_with(source, "s", &config).unwrap();
        assert_eq!(model.fields.len(), 1);
    }
}
