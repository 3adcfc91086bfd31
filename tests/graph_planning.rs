//! Build file loading (includes, extends, validation) and graph planning
//! (stable ids, closures, src normalisation).

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use tempfile::tempdir;

use workdag::config::{load_and_validate, RawSrc};
use workdag::dag::{name_index, plan_graph};
use workdag::errors::WorkdagError;
use workdag_test_utils::builders::{test_id, BuildFileBuilder, TaskConfigBuilder};
use workdag_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn includes_are_resolved_and_items_get_origin_scoped_ids() -> TestResult {
    init_tracing();
    let dir = tempdir()?;

    fs::write(
        dir.path().join("Workdag.toml"),
        r#"
include = ["services.toml"]

[task.build]
cmd = ["make", "build"]
needs = ["db"]
"#,
    )?;
    fs::write(
        dir.path().join("services.toml"),
        r#"
[service.db]
cmd = ["postgres"]
endpoint = "localhost:5432"
"#,
    )?;

    let build = load_and_validate(dir.path().join("Workdag.toml"))?;
    let graph = plan_graph(&build)?;

    let index = name_index(&graph);
    assert_eq!(index["build"], "Workdag.toml:build");
    assert_eq!(index["db"], "services.toml:db");

    let task = graph.by_name("build").unwrap();
    assert_eq!(task.needs, vec!["services.toml:db".to_string()]);
    Ok(())
}

#[test]
fn a_file_included_twice_contributes_items_once() -> TestResult {
    init_tracing();
    let dir = tempdir()?;

    fs::write(
        dir.path().join("Workdag.toml"),
        r#"
include = ["a.toml", "b.toml"]

[task.top]
cmd = ["make"]
deps = ["shared"]
"#,
    )?;
    fs::write(
        dir.path().join("a.toml"),
        r#"include = ["shared.toml"]"#,
    )?;
    fs::write(
        dir.path().join("b.toml"),
        r#"include = ["shared.toml"]"#,
    )?;
    fs::write(
        dir.path().join("shared.toml"),
        r#"
[task.shared]
cmd = ["make", "shared"]
"#,
    )?;

    let build = load_and_validate(dir.path().join("Workdag.toml"))?;
    assert_eq!(build.tasks.len(), 2);
    let graph = plan_graph(&build)?;
    assert_eq!(graph.len(), 2);
    Ok(())
}

#[test]
fn extends_inherits_unset_fields() -> TestResult {
    init_tracing();
    let dir = tempdir()?;

    fs::write(
        dir.path().join("Workdag.toml"),
        r#"
[task.base]
cmd = ["make", "base"]
env = { CC = "clang", OPT = "0" }
src = ["src/**/*.c"]

[task.release]
extends = "base"
env = { OPT = "3" }
"#,
    )?;

    let build = load_and_validate(dir.path().join("Workdag.toml"))?;
    let release = &build.tasks["release"].cfg;
    assert_eq!(release.cmd, vec!["make", "base"]);
    assert_eq!(release.env["CC"], "clang");
    assert_eq!(release.env["OPT"], "3", "child values win over inherited ones");
    assert_eq!(release.src.len(), 1);
    Ok(())
}

#[test]
fn unknown_references_are_rejected() -> TestResult {
    init_tracing();
    let dir = tempdir()?;

    fs::write(
        dir.path().join("Workdag.toml"),
        r#"
[task.build]
cmd = ["make"]
deps = ["nope"]
"#,
    )?;

    match load_and_validate(dir.path().join("Workdag.toml")) {
        Err(WorkdagError::Config(message)) => {
            assert!(message.contains("nope"), "unexpected message: {message}");
        }
        other => panic!("expected a config error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn needs_must_reference_services_not_tasks() -> TestResult {
    init_tracing();
    let dir = tempdir()?;

    fs::write(
        dir.path().join("Workdag.toml"),
        r#"
[task.helper]
cmd = ["true"]

[task.build]
cmd = ["make"]
needs = ["helper"]
"#,
    )?;

    assert!(matches!(
        load_and_validate(dir.path().join("Workdag.toml")),
        Err(WorkdagError::Config(_))
    ));
    Ok(())
}

#[test]
fn closure_covers_deps_and_needs_transitively() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new(&["echo"]).build())
        .with_task("b", TaskConfigBuilder::new(&["echo"]).dep("a").build())
        .with_task("c", TaskConfigBuilder::new(&["echo"]).dep("b").build())
        .with_task("unrelated", TaskConfigBuilder::new(&["echo"]).build())
        .build();
    let graph = plan_graph(&build)?;

    let closure = graph.closure_of(&test_id("c"));
    assert_eq!(
        closure,
        vec![test_id("a"), test_id("b"), test_id("c")],
        "closure must exclude unrelated items"
    );
    Ok(())
}

#[test]
fn bare_src_patterns_split_into_root_and_matcher() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make"])
                .src("src/gen/**/*.rs")
                .src("Cargo.toml")
                .build(),
        )
        .build();
    let graph = plan_graph(&build)?;
    let item = graph.by_name("build").unwrap();

    assert_eq!(item.src[0].path, PathBuf::from("src/gen"));
    assert_eq!(item.src[0].matches, vec!["**/*.rs".to_string()]);

    // A literal path has no matcher: it is hashed/watched directly.
    assert_eq!(item.src[1].path, PathBuf::from("Cargo.toml"));
    assert!(item.src[1].matches.is_empty());
    Ok(())
}

#[test]
fn default_src_applies_only_to_items_without_their_own() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_default_src("src/**/*.rs")
        .with_task("plain", TaskConfigBuilder::new(&["make"]).build())
        .with_task(
            "custom",
            TaskConfigBuilder::new(&["make"]).src("proto/**/*.proto").build(),
        )
        .build();
    let graph = plan_graph(&build)?;

    let plain = graph.by_name("plain").unwrap();
    assert_eq!(plain.src[0].path, PathBuf::from("src"));

    let custom = graph.by_name("custom").unwrap();
    assert_eq!(custom.src.len(), 1);
    assert_eq!(custom.src[0].path, PathBuf::from("proto"));
    Ok(())
}

#[test]
fn raw_src_accepts_both_forms() -> TestResult {
    init_tracing();

    let raw: workdag::config::RawBuildFile = toml::from_str(
        r#"
[task.build]
cmd = ["make"]
src = ["src/**/*.rs", { path = "proto", matches = ["**/*.proto"] }]
"#,
    )?;
    let task = &raw.task["build"];
    assert!(matches!(task.src[0], RawSrc::Pattern(_)));
    assert!(matches!(task.src[1], RawSrc::Rooted { .. }));
    Ok(())
}
