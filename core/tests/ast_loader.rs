use std::io::Write;

use kiln_core::ast::{load_ast_from_path, load_ast_from_str, NodeKind};
use kiln_core::ir::op::IROp;
use kiln_core::{lower_ast_to_ir, KilnErrorExt, Level};

const SCRIPT: &str = r#"{
  "kind": {
    "type": "Root",
    "scope": ["x"],
    "body": {
      "kind": {
        "type": "Block",
        "body": [
          {
            "kind": {"type": "Newline", "body": {
              "kind": {"type": "LocalAsgn", "name": "x", "depth": 0, "value": {"kind": {"type": "Fixnum", "value": 1}}}
            }},
            "location": {"line": 1}
          },
          {
            "kind": {"type": "Newline", "body": {
              "kind": {"type": "While",
                "condition": {"kind": {"type": "False"}},
                "body": {"kind": {"type": "LocalVar", "name": "x", "depth": 0}}}
            }},
            "location": {"line": 2}
          }
        ]
      }
    }
  }
}"#;

#[test]
fn loads_a_tagged_json_document() {
    let ast = load_ast_from_str(SCRIPT, "script.json").expect("document should load");
    let NodeKind::Root { body: Some(body), scope } = &ast.kind else { panic!("not a Root: {}", ast) };
    assert_eq!(scope, &vec!["x".to_string()]);

    let NodeKind::Block { body: statements } = &body.kind else { panic!("root body is not a block") };
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[1].line(), 2);
    match &statements[1].kind {
        NodeKind::Newline { body } => {
            assert!(matches!(body.kind, NodeKind::While { evaluate_at_start: true, .. }), "loops test at the head by default")
        }
        other => panic!("unexpected statement {:?}", other),
    }
}

#[test]
fn loaded_document_lowers() {
    let ast = load_ast_from_str(SCRIPT, "script.json").expect("document should load");
    let module = lower_ast_to_ir(&ast).expect("lowering failed");
    let root = module.root_scope();

    assert!(root.find_local("x").is_some());
    let lines: Vec<usize> = root
        .instrs
        .iter()
        .filter_map(|op| match op {
            IROp::LineNumber { line } => Some(*line),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec![1, 2]);
}

#[test]
fn empty_document_is_rejected() {
    let err = load_ast_from_str("  \n", "blank.json").expect_err("empty input must fail");
    assert_eq!(err.level(), Level::Error);
    assert!(err.message().contains("empty"), "{}", err);
    assert_eq!(err.location().map(|l| l.file), Some("blank.json".to_string()));
}

#[test]
fn malformed_json_reports_where_it_broke() {
    let err = load_ast_from_str("{\n  \"kind\": {\"type\": \"Root\",\n  ", "broken.json").expect_err("must fail");
    assert!(err.message().starts_with("Malformed AST document"), "{}", err);
    assert_eq!(err.issuer(), "kiln.ast.loader");
}

#[test]
fn unknown_node_kind_is_rejected() {
    let err = load_ast_from_str(r#"{"kind": {"type": "Teleport"}}"#, "odd.json").expect_err("must fail");
    assert!(err.message().contains("Teleport"), "{}", err);
    let location = err.location().expect("serde reports a position");
    assert_eq!(location.file, "odd.json");
    assert_eq!(location.line, 1);
}

#[test]
fn loads_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(SCRIPT.as_bytes()).expect("write");
    let ast = load_ast_from_path(file.path()).expect("document should load");
    assert!(matches!(ast.kind, NodeKind::Root { .. }));
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = load_ast_from_path(&dir.path().join("absent.json")).expect_err("must fail");
    assert!(err.message().starts_with("Unable to read AST document"), "{}", err);
    assert!(err.location().is_none());
}
