//! Integration tests for fastmd-cache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn fastmd_cache() -> Command {
        cargo_bin_cmd!("fastmd-cache")
    }

    #[test]
    fn help_displays() {
        fastmd_cache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Content-addressed build cache"));
    }

    #[test]
    fn version_displays() {
        fastmd_cache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("fastmd-cache"));
    }

    #[test]
    fn stats_on_empty_store() {
        let dir = TempDir::new().unwrap();
        fastmd_cache()
            .args(["stats", "--cache-dir"])
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("0 entries"));
    }

    #[test]
    fn clear_empty_store() {
        let dir = TempDir::new().unwrap();
        fastmd_cache()
            .args(["clear", "--cache-dir"])
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 0 entries"));
    }

    #[test]
    fn verify_empty_store() {
        let dir = TempDir::new().unwrap();
        fastmd_cache()
            .args(["verify", "--cache-dir"])
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("decode cleanly"));
    }

    #[test]
    fn warm_then_stats_then_clear() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(
            &manifest,
            r#"[{"id":"d.md","content":"Hi","output":"export default 2;"}]"#,
        )
        .unwrap();
        let cache_dir = dir.path().join("cache");

        fastmd_cache()
            .args(["warm", "--manifest"])
            .arg(&manifest)
            .arg("--cache-dir")
            .arg(&cache_dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("Warmed 1 of 1"));

        fastmd_cache()
            .args(["stats", "--cache-dir"])
            .arg(&cache_dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("1 entries"));

        fastmd_cache()
            .args(["clear", "--cache-dir"])
            .arg(&cache_dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1 entries"));
    }

    #[test]
    fn warm_missing_manifest_fails() {
        let dir = TempDir::new().unwrap();
        fastmd_cache()
            .args(["warm", "--manifest", "/nonexistent/manifest.json"])
            .args(["--cache-dir"])
            .arg(dir.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }
}

mod pipeline_tests {
    use fastmd_cache::config::{CacheOptions, ConfigFile};
    use fastmd_cache::coordinator::WarmEntry;
    use fastmd_cache::{
        CacheConfig, CacheCoordinator, DiskStore, TransformOutput, Unit, Verbosity,
    };
    use tempfile::TempDir;

    fn config_for(dir: &TempDir, salt: &str) -> CacheConfig {
        CacheConfig::resolve(
            CacheOptions {
                cache_dir: Some(dir.path().to_path_buf()),
                salt: Some(salt.to_string()),
                verbosity: Some(Verbosity::Silent),
                ..Default::default()
            },
            ConfigFile::default(),
        )
    }

    fn coordinator_for(dir: &TempDir, salt: &str) -> CacheCoordinator<DiskStore> {
        let config = config_for(dir, salt);
        let store = DiskStore::new(&config.cache_dir);
        CacheCoordinator::new(&config, store)
    }

    #[tokio::test]
    async fn end_to_end_miss_write_hit() {
        let dir = TempDir::new().unwrap();
        let unit = Unit::new("docs/a.md", "# Hello");

        let first = coordinator_for(&dir, "s");
        assert!(first.pre(&unit).await.unwrap().is_none());
        first
            .post("docs/a.md", &TransformOutput::new("export default 1;"))
            .await;
        let summary = first.finish().await;
        assert_eq!(summary.misses, 1);

        // New coordinator instance, same store, same inputs
        let second = coordinator_for(&dir, "s");
        let served = second.pre(&unit).await.unwrap().unwrap();
        assert_eq!(served.primary, b"export default 1;");
        let summary = second.finish().await;
        assert_eq!(summary.hits, 1);
        assert_eq!(summary.hit_rate, 1.0);
    }

    #[tokio::test]
    async fn salt_rotation_invalidates() {
        let dir = TempDir::new().unwrap();
        let unit = Unit::new("docs/a.md", "# Hello");

        let alpha = coordinator_for(&dir, "alpha");
        alpha.pre(&unit).await.unwrap();
        alpha.post("docs/a.md", &TransformOutput::new("out")).await;
        assert!(alpha.pre(&unit).await.unwrap().is_some());

        // Same store, different salt: everything misses
        let beta = coordinator_for(&dir, "beta");
        assert!(beta.pre(&unit).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn equivalent_inputs_share_entries() {
        let dir = TempDir::new().unwrap();
        let coord = coordinator_for(&dir, "s");

        let written = Unit::new(
            "docs/a.md",
            "---\ntitle: X\ndraft: true\n---\n# Body\n",
        );
        coord.pre(&written).await.unwrap();
        coord.post("docs/a.md", &TransformOutput::new("out")).await;

        // Permuted frontmatter keys, CRLF line endings, a BOM, and a
        // differently-spelled identity all land on the same entry
        let equivalent = Unit::new(
            "./Docs//A.md",
            "\u{FEFF}---\r\ndraft: true\r\ntitle: X\r\n---\r\n# Body\r\n",
        );
        let served = coord.pre(&equivalent).await.unwrap().unwrap();
        assert_eq!(served.primary, b"out");
    }

    #[tokio::test]
    async fn corrupted_entry_never_throws() {
        let dir = TempDir::new().unwrap();
        let coord = coordinator_for(&dir, "s");
        let unit = Unit::new("d.md", "Hi");

        let fp = coord.fingerprint_for(&unit).await;
        let entry_dir = dir.path().join(&fp[..2]).join(&fp);
        std::fs::create_dir_all(&entry_dir).unwrap();
        std::fs::write(entry_dir.join("meta.json"), b"\x00\x01garbage").unwrap();

        assert!(coord.pre(&unit).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn warm_round_trip_across_instances() {
        let dir = TempDir::new().unwrap();

        let warmer = coordinator_for(&dir, "s");
        warmer
            .warm(&[WarmEntry {
                id: "d.md".to_string(),
                content: "Hi".to_string(),
                output: TransformOutput::new("export default 2;"),
            }])
            .await
            .unwrap();

        let reader = coordinator_for(&dir, "s");
        let served = reader.pre(&Unit::new("d.md", "Hi")).await.unwrap().unwrap();
        assert_eq!(served.primary, b"export default 2;");
    }

    #[tokio::test]
    async fn saved_time_accumulates_from_write_durations() {
        let dir = TempDir::new().unwrap();
        let unit = Unit::new("a.md", "content");

        let writer = coordinator_for(&dir, "s");
        writer.pre(&unit).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        writer.post("a.md", &TransformOutput::new("out")).await;
        writer.finish().await;

        let reader = coordinator_for(&dir, "s");
        reader.pre(&unit).await.unwrap();
        let summary = reader.finish().await;
        assert_eq!(summary.hits, 1);
        // The hit recovers the original miss duration from the entry
        assert!(summary.saved_ms >= 30);
    }

    #[tokio::test]
    async fn concurrent_units_do_not_interfere() {
        let dir = TempDir::new().unwrap();
        let coord = std::sync::Arc::new(coordinator_for(&dir, "s"));

        let mut handles = Vec::new();
        for i in 0..16 {
            let coord = std::sync::Arc::clone(&coord);
            handles.push(tokio::spawn(async move {
                let id = format!("docs/{}.md", i);
                let unit = Unit::new(&id, format!("# Unit {}", i));
                assert!(coord.pre(&unit).await.unwrap().is_none());
                coord
                    .post(&id, &TransformOutput::new(format!("export default {};", i)))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let summary = coord.finish().await;
        assert_eq!(summary.misses, 16);

        // Every unit is now served with its own output
        for i in 0..16 {
            let unit = Unit::new(format!("docs/{}.md", i), format!("# Unit {}", i));
            let served = coord.pre(&unit).await.unwrap().unwrap();
            assert_eq!(served.primary, format!("export default {};", i).as_bytes());
        }
    }

    #[tokio::test]
    async fn racing_writers_on_same_fingerprint() {
        let dir = TempDir::new().unwrap();
        let a = std::sync::Arc::new(coordinator_for(&dir, "s"));
        let b = std::sync::Arc::new(coordinator_for(&dir, "s"));
        let unit = Unit::new("shared.md", "# Shared");

        assert!(a.pre(&unit).await.unwrap().is_none());
        assert!(b.pre(&unit).await.unwrap().is_none());

        // Both producers post equivalent output; both observe success
        let out_a = TransformOutput::new("same output");
        let out_b = TransformOutput::new("same output");
        tokio::join!(
            a.post(&unit.id, &out_a),
            b.post(&unit.id, &out_b),
        );

        let served = a.pre(&unit).await.unwrap().unwrap();
        assert_eq!(served.primary, b"same output");
    }
}
