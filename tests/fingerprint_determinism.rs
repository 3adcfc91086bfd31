//! Fingerprints must be insensitive to map/array ordering in the build file
//! and sensitive to every actual value change.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use workdag::config::BuildFile;
use workdag::dag::plan_graph;
use workdag::fingerprint::{CacheStore, FingerprintResolver};
use workdag::fs::mock::MockFileSystem;
use workdag::fs::FileSystem;
use workdag::types::CacheMode;
use workdag_test_utils::builders::{BuildFileBuilder, TaskConfigBuilder};
use workdag_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn resolver(fs: &Arc<MockFileSystem>, mode: CacheMode) -> FingerprintResolver {
    let fs_dyn: Arc<dyn FileSystem> = fs.clone();
    FingerprintResolver::new(
        fs_dyn.clone(),
        CacheStore::new(fs_dyn, PathBuf::from("cache")),
        mode,
        PathBuf::new(),
    )
}

fn key_of(build: &BuildFile, task: &str, fs: &Arc<MockFileSystem>, mode: CacheMode) -> String {
    let graph = plan_graph(build).expect("planning failed");
    let item = graph.by_name(task).expect("unknown task");
    resolver(fs, mode)
        .compute(item)
        .expect("fingerprint failed")
        .state_key
}

#[test]
fn mount_env_dep_order_does_not_affect_the_key() -> TestResult {
    init_tracing();
    let fs = Arc::new(MockFileSystem::new());

    let forward = BuildFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new(&["echo", "a"]).build())
        .with_task("b", TaskConfigBuilder::new(&["echo", "b"]).build())
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make", "all"])
                .dep("a")
                .dep("b")
                .mount("/data:/data")
                .mount("/tmp:/scratch")
                .env("A", "1")
                .env("B", "2")
                .build(),
        )
        .build();

    let reversed = BuildFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new(&["echo", "a"]).build())
        .with_task("b", TaskConfigBuilder::new(&["echo", "b"]).build())
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make", "all"])
                .dep("b")
                .dep("a")
                .mount("/tmp:/scratch")
                .mount("/data:/data")
                .env("B", "2")
                .env("A", "1")
                .build(),
        )
        .build();

    assert_eq!(
        key_of(&forward, "build", &fs, CacheMode::Checksum),
        key_of(&reversed, "build", &fs, CacheMode::Checksum)
    );
    Ok(())
}

#[test]
fn value_changes_change_the_key() -> TestResult {
    init_tracing();
    let fs = Arc::new(MockFileSystem::new());

    let base = BuildFileBuilder::new()
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make", "all"])
                .image("rust:1.80")
                .build(),
        )
        .build();
    let base_key = key_of(&base, "build", &fs, CacheMode::Checksum);

    let other_cmd = BuildFileBuilder::new()
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make", "test"])
                .image("rust:1.80")
                .build(),
        )
        .build();
    assert_ne!(base_key, key_of(&other_cmd, "build", &fs, CacheMode::Checksum));

    let other_image = BuildFileBuilder::new()
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make", "all"])
                .image("rust:1.81")
                .build(),
        )
        .build();
    assert_ne!(
        base_key,
        key_of(&other_image, "build", &fs, CacheMode::Checksum)
    );

    Ok(())
}

#[test]
fn description_is_cosmetic() -> TestResult {
    init_tracing();
    let fs = Arc::new(MockFileSystem::new());

    let plain = BuildFileBuilder::new()
        .with_task("build", TaskConfigBuilder::new(&["make"]).build())
        .build();
    let documented = BuildFileBuilder::new()
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make"])
                .description("compiles the thing")
                .build(),
        )
        .build();

    assert_eq!(
        key_of(&plain, "build", &fs, CacheMode::Checksum),
        key_of(&documented, "build", &fs, CacheMode::Checksum)
    );
    Ok(())
}

#[test]
fn file_content_changes_the_key_in_checksum_mode() -> TestResult {
    init_tracing();
    let fs = Arc::new(MockFileSystem::new());
    fs.add_file("src/main.rs", "fn main() {}");

    let build = BuildFileBuilder::new()
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make"]).src("src/**/*.rs").build(),
        )
        .build();

    let before = key_of(&build, "build", &fs, CacheMode::Checksum);
    fs.add_file("src/main.rs", "fn main() { println!(); }");
    let after = key_of(&build, "build", &fs, CacheMode::Checksum);

    assert_ne!(before, after);
    Ok(())
}

#[test]
fn touching_a_file_only_matters_in_modify_date_mode() -> TestResult {
    init_tracing();
    let fs = Arc::new(MockFileSystem::new());
    fs.add_file_with_mtime("src/main.rs", "fn main() {}", UNIX_EPOCH + Duration::from_secs(1));

    let build = BuildFileBuilder::new()
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make"]).src("src/**/*.rs").build(),
        )
        .build();

    let checksum_before = key_of(&build, "build", &fs, CacheMode::Checksum);
    let mtime_before = key_of(&build, "build", &fs, CacheMode::ModifyDate);

    fs.touch("src/main.rs", UNIX_EPOCH + Duration::from_secs(99));

    assert_eq!(checksum_before, key_of(&build, "build", &fs, CacheMode::Checksum));
    assert_ne!(mtime_before, key_of(&build, "build", &fs, CacheMode::ModifyDate));
    Ok(())
}

#[test]
fn src_list_order_does_not_affect_the_key() -> TestResult {
    init_tracing();
    let fs = Arc::new(MockFileSystem::new());
    fs.add_file("src/a.rs", "a");
    fs.add_file("proto/x.proto", "x");

    let forward = BuildFileBuilder::new()
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make"])
                .src("src/**/*.rs")
                .src("proto/**/*.proto")
                .build(),
        )
        .build();
    let reversed = BuildFileBuilder::new()
        .with_task(
            "build",
            TaskConfigBuilder::new(&["make"])
                .src("proto/**/*.proto")
                .src("src/**/*.rs")
                .build(),
        )
        .build();

    assert_eq!(
        key_of(&forward, "build", &fs, CacheMode::Checksum),
        key_of(&reversed, "build", &fs, CacheMode::Checksum)
    );
    Ok(())
}
