//! Property: for any set of mounts, env entries and deps, every permutation
//! of the build file's ordering produces the identical fingerprint, and
//! perturbing any single value produces a different one.

use std::path::PathBuf;
use std::sync::Arc;

use proptest::prelude::*;

use workdag::config::BuildFile;
use workdag::dag::plan_graph;
use workdag::fingerprint::{CacheStore, FingerprintResolver};
use workdag::fs::mock::MockFileSystem;
use workdag::fs::FileSystem;
use workdag::types::CacheMode;
use workdag_test_utils::builders::{BuildFileBuilder, TaskConfigBuilder};

fn key_of(build: &BuildFile) -> String {
    let fs: Arc<MockFileSystem> = Arc::new(MockFileSystem::new());
    let fs_dyn: Arc<dyn FileSystem> = fs;
    let resolver = FingerprintResolver::new(
        fs_dyn.clone(),
        CacheStore::new(fs_dyn, PathBuf::from("cache")),
        CacheMode::Checksum,
        PathBuf::new(),
    );
    let graph = plan_graph(build).expect("planning failed");
    let item = graph.by_name("subject").expect("missing subject task");
    resolver.compute(item).expect("fingerprint failed").state_key
}

fn build_with(mounts: &[String], env: &[(String, String)], deps: &[String]) -> BuildFile {
    let mut builder = BuildFileBuilder::new();
    for dep in deps {
        builder = builder.with_task(dep, TaskConfigBuilder::new(&["echo"]).build());
    }

    let mut task = TaskConfigBuilder::new(&["make", "subject"]);
    for mount in mounts {
        task = task.mount(mount);
    }
    for (k, v) in env {
        task = task.env(k, v);
    }
    for dep in deps {
        task = task.dep(dep);
    }
    builder.with_task("subject", task.build()).build()
}

prop_compose! {
    fn inputs()(
        mounts in proptest::collection::btree_set("[a-z]{1,8}", 0..5),
        env in proptest::collection::btree_map("[A-Z]{1,6}", "[a-z0-9]{0,6}", 0..5),
        deps in proptest::collection::btree_set("dep_[a-z]{1,5}", 0..4),
    ) -> (Vec<String>, Vec<(String, String)>, Vec<String>) {
        (
            mounts.into_iter().collect(),
            env.into_iter().collect(),
            deps.into_iter().collect(),
        )
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn permutations_share_one_fingerprint(
        (mounts, env, deps) in inputs(),
        seed in any::<u64>(),
    ) {
        let baseline = key_of(&build_with(&mounts, &env, &deps));

        // Deterministic shuffle driven by the seed.
        let mut shuffled_mounts = mounts.clone();
        let mut shuffled_env = env.clone();
        let mut shuffled_deps = deps.clone();
        shuffle(&mut shuffled_mounts, seed);
        shuffle(&mut shuffled_env, seed.wrapping_mul(31));
        shuffle(&mut shuffled_deps, seed.wrapping_mul(131));

        let permuted = key_of(&build_with(&shuffled_mounts, &shuffled_env, &shuffled_deps));
        prop_assert_eq!(baseline, permuted);
    }

    #[test]
    fn perturbing_a_mount_changes_the_fingerprint(
        (mounts, env, deps) in inputs(),
    ) {
        let baseline = key_of(&build_with(&mounts, &env, &deps));

        let mut perturbed = mounts.clone();
        perturbed.push("zz_extra_mount".to_string());
        let changed = key_of(&build_with(&perturbed, &env, &deps));

        prop_assert_ne!(baseline, changed);
    }
}

/// Minimal deterministic Fisher-Yates driven by a seed; avoids pulling in a
/// rand dependency just for permutation tests.
fn shuffle<T>(items: &mut [T], mut seed: u64) {
    let len = items.len();
    for i in (1..len).rev() {
        // xorshift64
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let j = (seed as usize) % (i + 1);
        items.swap(i, j);
    }
}
