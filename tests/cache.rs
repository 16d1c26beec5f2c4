mod common;

use std::fs;

use binreg::cache::Cache;
use binreg::domain::PartialAssignment;

use common::{compiler_pkg, partial, read_tree, utf8, write_sample_tree};

#[test]
fn slot_lifecycle() {
    let temp = tempfile::tempdir().unwrap();
    let work = utf8(temp.path());
    let cache = Cache::new(work.join("cache"));
    let registry = compiler_pkg();
    let assignment = registry.resolve(&partial(&[("os", "windows")])).unwrap();
    let slot = cache.slot("corp", &registry, &assignment);

    assert!(slot.dir().ends_with("corp/compiler-pkg/os=windows/arch=x64"));
    assert!(!slot.is_complete());
    assert!(slot.metadata().is_none());

    cache.ensure_root().unwrap();
    let staging = cache.staging_dir().unwrap();
    let staged = utf8(&staging.path().join("bin"));
    write_sample_tree(&staged, "staged");
    let expected = read_tree(&staged);

    slot.install(&staged).unwrap();
    assert!(slot.is_complete());
    assert!(!staged.as_std_path().exists());
    let metadata = slot.metadata().unwrap();
    assert_eq!(metadata.remote, "corp");
    assert_eq!(metadata.registry, "compiler-pkg");
    assert_eq!(metadata.assignment, "os=windows,arch=x64");

    let dest = work.join("project/tools");
    fs::create_dir_all(dest.as_std_path()).unwrap();
    fs::write(dest.join("leftover").as_std_path(), "x").unwrap();
    slot.copy_to(&dest).unwrap();
    assert_eq!(read_tree(&dest), expected);

    slot.invalidate().unwrap();
    assert!(!slot.is_complete());
    assert!(!slot.bin_dir().as_std_path().exists());
}

#[test]
fn bin_without_marker_is_not_a_hit() {
    let temp = tempfile::tempdir().unwrap();
    let cache = Cache::new(utf8(temp.path()));
    let registry = compiler_pkg();
    let assignment = registry.resolve(&PartialAssignment::new()).unwrap();
    let slot = cache.slot("mirror", &registry, &assignment);

    write_sample_tree(&slot.bin_dir(), "partial");
    assert!(!slot.is_complete());

    let source = utf8(&temp.path().join("source"));
    write_sample_tree(&source, "complete");
    slot.store_copy(&source).unwrap();
    assert!(slot.is_complete());
    assert_eq!(read_tree(&slot.bin_dir()), read_tree(&source));
}

#[test]
fn clearing_a_remote_keeps_the_others() {
    let temp = tempfile::tempdir().unwrap();
    let cache = Cache::new(utf8(temp.path()));
    let registry = compiler_pkg();
    let assignment = registry.resolve(&PartialAssignment::new()).unwrap();
    let source = utf8(&temp.path().join("source"));
    write_sample_tree(&source, "x");

    for remote in ["a", "b"] {
        cache
            .slot(remote, &registry, &assignment)
            .store_copy(&source)
            .unwrap();
    }
    cache.clear_remote("a").unwrap();
    assert!(!cache.slot("a", &registry, &assignment).is_complete());
    assert!(cache.slot("b", &registry, &assignment).is_complete());
    cache.clear_remote("a").unwrap();
}

#[test]
fn schema_copy_lives_with_the_remote() {
    let temp = tempfile::tempdir().unwrap();
    let cache = Cache::new(utf8(temp.path()));
    let registry = compiler_pkg();
    assert!(cache.cached_schema("corp", "compiler-pkg").is_none());

    cache.store_schema("corp", &registry).unwrap();
    assert_eq!(cache.cached_schema("corp", "compiler-pkg"), Some(registry));
    assert!(cache.cached_schema("mirror", "compiler-pkg").is_none());

    cache.clear_remote("corp").unwrap();
    assert!(cache.cached_schema("corp", "compiler-pkg").is_none());
}
