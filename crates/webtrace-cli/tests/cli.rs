// SPDX-License-Identifier: Apache-2.0

//! End-to-end CLI tests: build a database from fixture scanner output, then
//! detect against fixture observations.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn hex(byte: u8) -> String {
    format!("{byte:02x}").repeat(32)
}

fn webtrace() -> Command {
    Command::cargo_bin("webtrace").unwrap()
}

fn fixture_hashes() -> String {
    let mut lines = String::new();
    for (byte, path, depth) in [
        (0x11u8, "/corpus/wp/5.2/wp-includes/version.php", 2),
        (0x12, "/corpus/wp/5.2/wp-admin/index.php", 2),
    ] {
        lines.push_str(&format!(
            "wordpress-cores\t5.2\t{}\t{path}\t{depth}\n",
            hex(byte)
        ));
    }
    for (byte, path, depth) in [
        (0x21u8, "/corpus/akismet/4.1/akismet.php", 1),
        (0x22, "/corpus/akismet/4.1/class.akismet.php", 1),
    ] {
        lines.push_str(&format!("wp.pakismet\t4.1\t{}\t{path}\t{depth}\n", hex(byte)));
    }
    lines
}

fn fixture_observations() -> String {
    let mut lines = String::new();
    for (byte, path) in [
        (0x11u8, "/srv/www/blog/wp-includes/version.php"),
        (0x12, "/srv/www/blog/wp-admin/index.php"),
        (0x21, "/srv/www/blog/wp-content/plugins/akismet/akismet.php"),
        (0x22, "/srv/www/blog/wp-content/plugins/akismet/class.akismet.php"),
        // Unknown to the database; must be ignored.
        (0xEE, "/srv/www/blog/wp-config.php"),
    ] {
        lines.push_str(&format!("{}\t{path}\n", hex(byte)));
    }
    lines
}

#[test]
fn build_then_detect_reports_nested_tree() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("fingerprints.db");
    let hashes = dir.path().join("hashes.tsv");
    let observations = dir.path().join("observations.tsv");
    std::fs::write(&hashes, fixture_hashes()).unwrap();
    std::fs::write(&observations, fixture_observations()).unwrap();

    webtrace()
        .arg("build")
        .arg(&db)
        .arg(&hashes)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 app-version entries"));
    assert!(db.exists());

    webtrace()
        .arg("detect")
        .arg(&db)
        .arg(&observations)
        .assert()
        .success()
        .stdout(predicate::str::contains("wordpress-cores:5.2 /srv/www/blog"))
        .stdout(predicate::str::contains(
            "  wp.pakismet:4.1 /srv/www/blog/wp-content/plugins/akismet",
        ));
}

#[test]
fn detect_emits_json_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("fingerprints.db");
    let hashes = dir.path().join("hashes.tsv");
    let observations = dir.path().join("observations.tsv");
    std::fs::write(&hashes, fixture_hashes()).unwrap();
    std::fs::write(&observations, fixture_observations()).unwrap();

    webtrace().arg("build").arg(&db).arg(&hashes).assert().success();

    webtrace()
        .arg("detect")
        .arg(&db)
        .arg(&observations)
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"wp_core\""))
        .stdout(predicate::str::contains("\"wp_plugin_akismet\""));
}

#[test]
fn detect_rejects_corrupt_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("fingerprints.db");
    let observations = dir.path().join("observations.tsv");
    std::fs::write(&db, b"not a database").unwrap();
    std::fs::write(&observations, fixture_observations()).unwrap();

    webtrace()
        .arg("detect")
        .arg(&db)
        .arg(&observations)
        .assert()
        .failure()
        .stderr(predicate::str::contains("STORE_CORRUPT"));
}

#[test]
fn build_fails_on_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("fingerprints.db");

    webtrace()
        .arg("build")
        .arg(&db)
        .arg(dir.path().join("absent.tsv"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot open"));
}

#[test]
fn detect_with_empty_observations_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("fingerprints.db");
    let hashes = dir.path().join("hashes.tsv");
    let observations = dir.path().join("empty.tsv");
    std::fs::write(&hashes, fixture_hashes()).unwrap();
    std::fs::write(&observations, "").unwrap();

    webtrace().arg("build").arg(&db).arg(&hashes).assert().success();
    webtrace()
        .arg("detect")
        .arg(&db)
        .arg(&observations)
        .assert()
        .success();
}

#[test]
fn similarity_prints_overlap_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let hashes = dir.path().join("hashes.tsv");
    // Two versions sharing every checksum: neither can be defined, and the
    // matrix shows full overlap.
    let mut lines = String::new();
    for version in ["1.0", "1.1"] {
        for byte in [0x31u8, 0x32, 0x33] {
            lines.push_str(&format!("blog\t{version}\t{}\n", hex(byte)));
        }
    }
    std::fs::write(&hashes, lines).unwrap();

    webtrace()
        .arg("similarity")
        .arg(&hashes)
        .arg("blog")
        .assert()
        .success()
        .stdout(predicate::str::contains("1.0:3"))
        .stdout(predicate::str::contains("1.000"));
}
