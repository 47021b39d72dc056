use predicates::prelude::PredicateBooleanExt;

#[test]
fn check_fcp_help() {
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("--destination"));
}

fn setup_test_env() -> (tempfile::TempDir, tempfile::TempDir) {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    (src_dir, dst_dir)
}

fn create_tree(root: &std::path::Path) {
    std::fs::create_dir_all(root.join("tree").join("sub")).unwrap();
    std::fs::create_dir_all(root.join("tree").join("empty")).unwrap();
    std::fs::write(root.join("tree").join("a.txt"), "alpha").unwrap();
    std::fs::write(root.join("tree").join("sub").join("b.log"), "beta").unwrap();
    std::fs::write(root.join("tree").join("sub").join("c.txt"), "gamma").unwrap();
}

fn get_file_content(path: &std::path::Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn test_destination_is_required() {
    let (src_dir, _dst_dir) = setup_test_env();
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.arg(src_dir.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("--destination"));
}

#[test]
fn test_copy_single_file_into_directory() {
    let (src_dir, dst_dir) = setup_test_env();
    let src_file = src_dir.path().join("test.txt");
    std::fs::write(&src_file, "test content").unwrap();
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.args([
        src_file.to_str().unwrap(),
        "-d",
        dst_dir.path().to_str().unwrap(),
    ])
    .assert()
    .success();
    assert_eq!(
        get_file_content(&dst_dir.path().join("test.txt")),
        "test content"
    );
}

#[test]
fn test_copy_file_under_new_name() {
    let (src_dir, dst_dir) = setup_test_env();
    let src_file = src_dir.path().join("test.txt");
    std::fs::write(&src_file, "renamed content").unwrap();
    let dst_file = dst_dir.path().join("other.txt");
    std::fs::write(&dst_file, "something considerably longer than the source").unwrap();
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.args([
        src_file.to_str().unwrap(),
        "-d",
        dst_file.to_str().unwrap(),
    ])
    .assert()
    .success();
    assert_eq!(get_file_content(&dst_file), "renamed content");
}

#[test]
fn test_copy_tree_to_multiple_destinations() {
    let (src_dir, dst_dir) = setup_test_env();
    create_tree(src_dir.path());
    let first = dst_dir.path().join("first");
    let second = dst_dir.path().join("second");
    std::fs::create_dir(&first).unwrap();
    std::fs::create_dir(&second).unwrap();
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.args([
        src_dir.path().join("tree").to_str().unwrap(),
        "-d",
        first.to_str().unwrap(),
        "--destination",
        second.to_str().unwrap(),
        "--slice",
        "2B",
        "--summary",
    ])
    .assert()
    .success()
    .stdout(predicates::str::contains("files copied: 3"));
    for dst in [&first, &second] {
        assert_eq!(get_file_content(&dst.join("tree").join("a.txt")), "alpha");
        assert_eq!(
            get_file_content(&dst.join("tree").join("sub").join("b.log")),
            "beta"
        );
        assert_eq!(
            get_file_content(&dst.join("tree").join("sub").join("c.txt")),
            "gamma"
        );
        assert!(dst.join("tree").join("empty").is_dir());
    }
}

#[test]
fn test_copy_with_pattern() {
    let (src_dir, dst_dir) = setup_test_env();
    create_tree(src_dir.path());
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.args([
        "--base-dir",
        src_dir.path().join("tree").to_str().unwrap(),
        "--pattern",
        r".*\.txt",
        "-d",
        dst_dir.path().to_str().unwrap(),
    ])
    .assert()
    .success();
    assert_eq!(get_file_content(&dst_dir.path().join("a.txt")), "alpha");
    assert_eq!(
        get_file_content(&dst_dir.path().join("sub").join("c.txt")),
        "gamma"
    );
    assert!(!dst_dir.path().join("sub").join("b.log").exists());
}

#[test]
fn test_no_recursive_skips_directories() {
    let (src_dir, dst_dir) = setup_test_env();
    create_tree(src_dir.path());
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.args([
        "--no-recursive",
        src_dir.path().join("tree").to_str().unwrap(),
        "-d",
        dst_dir.path().to_str().unwrap(),
    ])
    .assert()
    .success();
    assert!(!dst_dir.path().join("tree").exists());
}

#[test]
fn test_many_sources_onto_one_file_fails() {
    let (src_dir, dst_dir) = setup_test_env();
    create_tree(src_dir.path());
    let dst_file = dst_dir.path().join("target.txt");
    std::fs::write(&dst_file, "untouched").unwrap();
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.args([
        src_dir.path().join("tree").join("a.txt").to_str().unwrap(),
        src_dir.path().join("tree").join("sub").to_str().unwrap(),
        "-d",
        dst_file.to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicates::str::contains("cannot copy multiple sources"));
    assert_eq!(get_file_content(&dst_file), "untouched");
}

#[test]
fn test_quiet_suppresses_errors() {
    let (src_dir, dst_dir) = setup_test_env();
    create_tree(src_dir.path());
    let dst_file = dst_dir.path().join("target.txt");
    std::fs::write(&dst_file, "untouched").unwrap();
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.args([
        "-q",
        src_dir.path().join("tree").to_str().unwrap(),
        "-d",
        dst_file.to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicates::str::is_empty());
    assert_eq!(get_file_content(&dst_file), "untouched");
}

#[test]
fn test_invalid_pattern_fails() {
    let (src_dir, dst_dir) = setup_test_env();
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.args([
        "--base-dir",
        src_dir.path().to_str().unwrap(),
        "--pattern",
        "(unclosed",
        "-d",
        dst_dir.path().to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicates::str::contains("invalid source pattern"));
}

#[test]
fn test_text_progress() {
    let (src_dir, dst_dir) = setup_test_env();
    create_tree(src_dir.path());
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.args([
        src_dir.path().join("tree").to_str().unwrap(),
        "-d",
        dst_dir.path().to_str().unwrap(),
        "--progress-type",
        "text-updates",
    ])
    .assert()
    .success()
    .stderr(predicates::str::contains("copied").and(predicates::str::contains("end")));
}

#[test]
fn test_copy_into_own_directory_keeps_source() {
    let (src_dir, _dst_dir) = setup_test_env();
    let src_file = src_dir.path().join("a.txt");
    std::fs::write(&src_file, "precious data").unwrap();
    let mut cmd = assert_cmd::Command::cargo_bin("fcp").unwrap();
    cmd.args([
        src_file.to_str().unwrap(),
        "-d",
        src_dir.path().to_str().unwrap(),
    ])
    .assert()
    .failure();
    assert_eq!(get_file_content(&src_file), "precious data");
}
