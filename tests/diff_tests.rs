//! Struct diff tests

use cstruct_diff::{
    AggregateKind, ConditionGuard, DiffEntry, DiffError, DiffKind, DiffReport, Field, StructModel,
    SymbolAssignment, TypeDescriptor, diff_structs, diff_structs_with, parse_struct,
};

fn scalar(s: &str) -> TypeDescriptor {
    TypeDescriptor::Scalar(s.to_string())
}

fn vtime() -> (StructModel, StructModel) {
    let left = parse_struct(include_str!("fixtures/vtime_left.c"), "vtime").unwrap();
    let right = parse_struct(include_str!("fixtures/vtime_right.c"), "vtime").unwrap();
    (left, right)
}

fn kinds(entries: &[DiffEntry]) -> Vec<(DiffKind, &str)> {
    entries.iter().map(|e| (e.kind(), e.field())).collect()
}

/// 左右を入れ替えたときに期待される差分
fn invert(entry: &DiffEntry) -> DiffEntry {
    match entry.clone() {
        DiffEntry::Added { field, ty, guard } => DiffEntry::Removed { field, ty, guard },
        DiffEntry::Removed { field, ty, guard } => DiffEntry::Added { field, ty, guard },
        DiffEntry::TypeChanged { field, old, new } => DiffEntry::TypeChanged {
            field,
            old: new,
            new: old,
        },
        DiffEntry::BitfieldChanged { field, old, new } => DiffEntry::BitfieldChanged {
            field,
            old: new,
            new: old,
        },
        DiffEntry::GuardChanged { field, old, new } => DiffEntry::GuardChanged {
            field,
            old: new,
            new: old,
        },
        DiffEntry::Reordered {
            field,
            old_index,
            new_index,
        } => DiffEntry::Reordered {
            field,
            old_index: new_index,
            new_index: old_index,
        },
    }
}

fn sorted(mut entries: Vec<DiffEntry>) -> Vec<DiffEntry> {
    entries.sort_by_key(|e| (e.field().to_string(), e.kind() as u8));
    entries
}

#[test]
fn test_vtime_versions() {
    let (left, right) = vtime();
    let entries = diff_structs(&left, &right).unwrap();

    assert_eq!(
        entries,
        vec![
            DiffEntry::GuardChanged {
                field: "seqcount".to_string(),
                old: ConditionGuard::Defined("DEF".to_string()),
                new: ConditionGuard::Always,
            },
            DiffEntry::Removed {
                field: "cpu".to_string(),
                ty: scalar("unsigned int"),
                guard: ConditionGuard::Always,
            },
            DiffEntry::TypeChanged {
                field: "utime".to_string(),
                old: scalar("u64"),
                new: TypeDescriptor::Array(
                    Box::new(TypeDescriptor::Pointer(Box::new(scalar("u64")))),
                    vec![Some("2".to_string())]
                ),
            },
            DiffEntry::GuardChanged {
                field: "utime".to_string(),
                old: ConditionGuard::Always,
                new: ConditionGuard::Defined("DEFINITION".to_string()),
            },
            DiffEntry::TypeChanged {
                field: "stime".to_string(),
                old: TypeDescriptor::Array(Box::new(scalar("u64")), vec![Some("2".to_string())]),
                new: scalar("int"),
            },
            DiffEntry::Added {
                field: "newtime".to_string(),
                ty: scalar("u64"),
                guard: ConditionGuard::Always,
            },
        ]
    );
    assert!(entries.iter().all(|e| e.kind() != DiffKind::Reordered));
}

#[test]
fn test_vtime_report_lines() {
    let (left, right) = vtime();
    let lines: Vec<String> = diff_structs(&left, &right)
        .unwrap()
        .iter()
        .map(|e| e.to_string())
        .collect();
    assert_eq!(
        lines,
        vec![
            "~ seqcount: guard defined(DEF) -> 1",
            "- unsigned int cpu",
            "~ utime: type u64 -> u64 *[2]",
            "~ utime: guard 1 -> defined(DEFINITION)",
            "~ stime: type u64[2] -> int",
            "+ u64 newtime",
        ]
    );
}

#[test]
fn test_self_diff_is_empty() {
    for (source, name) in [
        (include_str!("fixtures/kmem_cache.c"), "kmem_cache"),
        (include_str!("fixtures/consw.c"), "consw"),
        (include_str!("fixtures/vtime_left.c"), "vtime"),
    ] {
        let model = parse_struct(source, name).unwrap();
        assert!(diff_structs(&model, &model).unwrap().is_empty(), "{}", name);
    }
}

#[test]
fn test_whitespace_and_comments_do_not_matter() {
    let left = parse_struct("struct s { unsigned   long a; /* x */ int *b; };", "s").unwrap();
    let right = parse_struct(
        "struct s {\n    unsigned long a;\n    int* b; // y\n};",
        "s",
    )
    .unwrap();
    assert!(diff_structs(&left, &right).unwrap().is_empty());
}

#[test]
fn test_swapping_sides_inverts_entries() {
    let (left, right) = vtime();
    let forward = diff_structs(&left, &right).unwrap();
    let backward = diff_structs(&right, &left).unwrap();
    assert_eq!(
        sorted(backward),
        sorted(forward.iter().map(invert).collect())
    );
}

#[test]
fn test_swapping_sides_inverts_reorders() {
    let left = parse_struct("struct s { int a; int b; int c; };", "s").unwrap();
    let right = parse_struct("struct s { int c; int a; int b; };", "s").unwrap();
    let forward = diff_structs(&left, &right).unwrap();
    assert_eq!(kinds(&forward), vec![(DiffKind::Reordered, "c")]);

    let backward = diff_structs(&right, &left).unwrap();
    assert_eq!(
        sorted(backward),
        sorted(forward.iter().map(invert).collect())
    );
}

#[test]
fn test_empty_structs() {
    let empty = parse_struct("struct s {};", "s").unwrap();
    let full = parse_struct("struct s { int a; long b; };", "s").unwrap();

    assert!(diff_structs(&empty, &empty).unwrap().is_empty());
    assert_eq!(
        kinds(&diff_structs(&empty, &full).unwrap()),
        vec![(DiffKind::Added, "a"), (DiffKind::Added, "b")]
    );
    assert_eq!(
        kinds(&diff_structs(&full, &empty).unwrap()),
        vec![(DiffKind::Removed, "a"), (DiffKind::Removed, "b")]
    );
}

#[test]
fn test_rename_is_remove_and_add() {
    let left = parse_struct("struct s { int old_name; };", "s").unwrap();
    let right = parse_struct("struct s { int new_name; };", "s").unwrap();
    assert_eq!(
        kinds(&diff_structs(&left, &right).unwrap()),
        vec![(DiffKind::Removed, "old_name"), (DiffKind::Added, "new_name")]
    );
}

#[test]
fn test_bitfield_width_change() {
    let left = parse_struct("struct s { unsigned int a : 3; unsigned int : 2; };", "s").unwrap();
    let right = parse_struct("struct s { unsigned int a : 4; unsigned int : 2; };", "s").unwrap();
    assert_eq!(
        diff_structs(&left, &right).unwrap(),
        vec![DiffEntry::BitfieldChanged {
            field: "a".to_string(),
            old: Some("3".to_string()),
            new: Some("4".to_string()),
        }]
    );
}

#[test]
fn test_mismatched_struct_names() {
    let left = StructModel::new("a", AggregateKind::Struct, vec![]);
    let right = StructModel::new("b", AggregateKind::Struct, vec![]);
    let err = diff_structs(&left, &right).unwrap_err();
    assert_eq!(
        err,
        DiffError::MismatchedStructName {
            left: "a".to_string(),
            right: "b".to_string(),
        }
    );
}

#[test]
fn test_assignment_projects_both_sides() {
    let (left, right) = vtime();

    // DEF と DEFINITION が偽なら seqcount は左に無く、utime は右に無い
    let assignment = SymbolAssignment::new().undefine("DEF").undefine("DEFINITION");
    let entries = diff_structs_with(&left, &right, Some(&assignment)).unwrap();
    assert_eq!(
        kinds(&entries),
        vec![
            (DiffKind::Removed, "cpu"),
            (DiffKind::Removed, "utime"),
            (DiffKind::TypeChanged, "stime"),
            (DiffKind::Added, "seqcount"),
            (DiffKind::Added, "newtime"),
        ]
    );

    // 割り当てなしは diff_structs と同じ
    assert_eq!(
        diff_structs_with(&left, &right, None).unwrap(),
        diff_structs(&left, &right).unwrap()
    );
}

#[test]
fn test_guard_kept_after_projection() {
    let left = StructModel::new(
        "s",
        AggregateKind::Struct,
        vec![Field::new("a", scalar("int")).with_guard(ConditionGuard::Defined("A".to_string()))],
    );
    let right = StructModel::new("s", AggregateKind::Struct, vec![Field::new("a", scalar("int"))]);
    let assignment = SymbolAssignment::new().define("A");
    let entries = diff_structs_with(&left, &right, Some(&assignment)).unwrap();
    assert_eq!(kinds(&entries), vec![(DiffKind::GuardChanged, "a")]);
}

#[test]
fn test_report_json_shape() {
    let (left, right) = vtime();
    let report = DiffReport::from_entries(diff_structs(&left, &right).unwrap());
    assert_eq!(report.len(), 6);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["added"][0]["kind"], "added");
    assert_eq!(json["added"][0]["field"], "newtime");
    assert_eq!(json["added"][0]["type"]["Scalar"], "u64");
    assert_eq!(json["removed"][0]["field"], "cpu");
    assert_eq!(json["changed"].as_array().map(Vec::len), Some(4));

    let back: DiffReport = serde_json::from_value(json).unwrap();
    assert_eq!(back, report);
}

#[test]
fn test_inline_struct_members_diffed_by_path() {
    let left = parse_struct("struct s { struct { int a; int b; } inner; };", "s").unwrap();
    let right =
        parse_struct("struct s { struct { int a; long b; int c; } inner; };", "s").unwrap();

    let forward = diff_structs(&left, &right).unwrap();
    assert_eq!(
        forward,
        vec![
            DiffEntry::TypeChanged {
                field: "inner.b".to_string(),
                old: scalar("int"),
                new: scalar("long"),
            },
            DiffEntry::Added {
                field: "inner.c".to_string(),
                ty: scalar("int"),
                guard: ConditionGuard::Always,
            },
        ]
    );
    assert_eq!(forward[0].to_string(), "~ inner.b: type int -> long");

    let backward = diff_structs(&right, &left).unwrap();
    assert_eq!(
        sorted(backward),
        sorted(forward.iter().map(invert).collect())
    );
}
