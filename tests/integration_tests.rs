//! End-to-end integration tests

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use cstruct_diff::analysis::{embedded_structs_in, load_model};
use cstruct_diff::{
    AnalysisBuilder, AnalysisConfig, AnalysisError, CompileError, DiffKind, StructCatalog,
    StructModel, compare_files, compare_sources, embedded_structs,
};

/// Helper to write source into a temporary file
fn source_file(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_compare_files() {
    let left = source_file(include_str!("fixtures/vtime_left.c"));
    let right = source_file(include_str!("fixtures/vtime_right.c"));

    let cmp = compare_files(left.path(), right.path(), "vtime", &AnalysisConfig::default()).unwrap();
    assert_eq!(cmp.left.fields.len(), 7);
    assert_eq!(cmp.right.fields.len(), 7);
    assert_eq!(cmp.entries.len(), 6);

    let report = cmp.report();
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.changed.len(), 4);
}

#[test]
fn test_compare_files_with_defines() {
    let left = source_file(include_str!("fixtures/vtime_left.c"));
    let right = source_file(include_str!("fixtures/vtime_right.c"));
    let config = AnalysisBuilder::new().define("DEF").define("DEFINITION").build();

    let cmp = compare_files(left.path(), right.path(), "vtime", &config).unwrap();
    // ガード付きフィールドは残り、ガードの差分も報告される
    let kinds: Vec<_> = cmp.entries.iter().map(|e| (e.kind(), e.field())).collect();
    assert_eq!(
        kinds,
        vec![
            (DiffKind::GuardChanged, "seqcount"),
            (DiffKind::Removed, "cpu"),
            (DiffKind::TypeChanged, "utime"),
            (DiffKind::GuardChanged, "utime"),
            (DiffKind::TypeChanged, "stime"),
            (DiffKind::Added, "newtime"),
        ]
    );
}

#[test]
fn test_missing_input_file() {
    let left = source_file(include_str!("fixtures/vtime_left.c"));
    let missing = Path::new("/nonexistent/vtime_right.c");
    let err = compare_files(left.path(), missing, "vtime", &AnalysisConfig::default()).unwrap_err();
    match err {
        AnalysisError::Io { path, .. } => assert_eq!(path.as_path(), missing),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_compile_error_names_file() {
    let left = source_file(include_str!("fixtures/vtime_left.c"));
    let right = source_file("struct vtime {\n#ifdef DEF\n    int a;\n};\n");
    let err = compare_files(left.path(), right.path(), "vtime", &AnalysisConfig::default())
        .unwrap_err();

    let message = err.to_string();
    assert!(message.starts_with(&right.path().display().to_string()));
    assert!(message.ends_with(":2:1: unbalanced conditional: #ifdef DEF"));
    assert!(matches!(
        err,
        AnalysisError::Compile { error: CompileError::UnbalancedConditional { .. }, .. }
    ));
}

#[test]
fn test_compare_sources_missing_struct() {
    let err = compare_sources(
        include_str!("fixtures/vtime_left.c"),
        include_str!("fixtures/cn_dev.c"),
        "vtime",
        &AnalysisConfig::default(),
    )
    .unwrap_err();
    assert!(err.to_string().starts_with("right:"));
    assert!(err.to_string().contains("struct definition not found: vtime"));
}

#[test]
fn test_embedded_structs() {
    let embedded = embedded_structs(
        include_str!("fixtures/embedded.c"),
        "Big_A",
        &AnalysisConfig::default(),
    )
    .unwrap();
    assert_eq!(embedded, vec!["Small_A", "Small_D", "Small_C", "Small_C1"]);
}

#[test]
fn test_embedded_structs_root_parse_failure() {
    let source = "struct ok { struct bad b; };\nstruct bad { int f(void); };\n";
    let err = embedded_structs_in(source, "input.h", "bad", &AnalysisConfig::default())
        .unwrap_err();
    assert!(err.to_string().starts_with("input.h:2:"));

    // 失敗した定義があっても他の構造体は解析できる
    let ok = embedded_structs_in(source, "input.h", "ok", &AnalysisConfig::default()).unwrap();
    assert_eq!(ok, vec!["bad"]);
}

#[test]
fn test_catalog_over_fixture() {
    let source = format!(
        "{}\n{}\n{}",
        include_str!("fixtures/kmem_cache.c"),
        include_str!("fixtures/cn_dev.c"),
        include_str!("fixtures/consw.c")
    );
    let catalog = StructCatalog::parse(&source, &Default::default()).unwrap();
    assert_eq!(
        catalog.names().collect::<Vec<_>>(),
        vec!["kmem_cache", "cn_dev", "consw"]
    );

    let stats = catalog.stats();
    assert_eq!(stats.structs, 3);
    assert_eq!(stats.fields, 25 + 6 + 26);
    assert_eq!(stats.guarded_fields, 6);
    assert_eq!(stats.failures, 0);
}

#[test]
fn test_model_json() {
    let config = AnalysisConfig::default();
    let model = load_model(include_str!("fixtures/vtime_right.c"), "right", "vtime", &config).unwrap();

    let json = serde_json::to_value(&model).unwrap();
    assert_eq!(json["name"], "vtime");
    assert_eq!(json["kind"], "struct");
    assert_eq!(json["fields"][3]["name"], "utime");
    assert_eq!(json["fields"][3]["guard"]["Defined"], "DEFINITION");
    assert_eq!(json["fields"][0]["guard"], "Always");
    assert_eq!(json["fields"][0]["loc"]["line"], 2);
    assert!(json["fields"][0].get("bitfield").is_none());

    let back: StructModel = serde_json::from_value(json).unwrap();
    assert_eq!(back, model);
}

#[test]
fn test_comparison_json() {
    let cmp = compare_sources(
        "struct s { int a; };",
        "struct s { long a; };",
        "s",
        &AnalysisConfig::default(),
    )
    .unwrap();
    let json = serde_json::to_value(&cmp.report()).unwrap();
    assert_eq!(json["changed"][0]["kind"], "type_changed");
    assert_eq!(json["changed"][0]["old"]["Scalar"], "int");
    assert_eq!(json["changed"][0]["new"]["Scalar"], "long");
}
