//! Integration tests for fontdepot

mod engine;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// A config file in a temp dir, with paths relative to it
    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn empty() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::write(
                dir.path().join("config.toml"),
                "[paths]\nfont_dir = \"fonts\"\ncache_dir = \"data/cache\"\nmeta_dir = \"data/meta\"\njournal_file = \"data/journal.log\"\n",
            )
            .unwrap();
            std::fs::create_dir(dir.path().join("fonts")).unwrap();
            Self { dir }
        }

        fn with_fonts() -> Self {
            let workspace = Self::empty();
            fontdepot::testing::write_example_family(&workspace.path().join("fonts")).unwrap();
            workspace
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn config(&self) -> PathBuf {
            self.path().join("config.toml")
        }

        fn cmd(&self) -> Command {
            let mut cmd = fontdepot();
            cmd.current_dir(self.path()).arg("-c").arg(self.config());
            cmd
        }
    }

    fn fontdepot() -> Command {
        let mut cmd = cargo_bin_cmd!("fontdepot");
        cmd.env_remove("FONTDEPOT_CONFIG");
        cmd
    }

    /// The `<key>.woff2` file name of the first `src: url(...)` in `css`
    fn first_subset_name(css: &str) -> String {
        css.lines()
            .find_map(|line| line.trim().strip_prefix("src: url("))
            .and_then(|rest| rest.split(')').next())
            .and_then(|url| url.rsplit('/').next())
            .unwrap()
            .to_string()
    }

    #[test]
    fn help_displays() {
        fontdepot()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Self-hosted web font subsets"));
    }

    #[test]
    fn version_displays() {
        fontdepot()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("fontdepot"));
    }

    #[test]
    fn config_path() {
        let ws = Workspace::empty();
        ws.cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let ws = Workspace::empty();
        ws.cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[paths]"))
            .stdout(predicate::str::contains("[cache]"));
    }

    #[test]
    fn config_init_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        fontdepot()
            .arg("-c")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("default_display = \"swap\""));
    }

    #[test]
    fn config_from_env() {
        let ws = Workspace::empty();
        fontdepot()
            .env("FONTDEPOT_CONFIG", ws.config())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(ws.config().display().to_string()));
    }

    #[test]
    fn invalid_config_fails_with_path() {
        let ws = Workspace::empty();
        std::fs::write(ws.config(), "[cache]\nworkers = \"many\"\n").unwrap();
        ws.cmd()
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"))
            .stderr(predicate::str::contains("config.toml"));
    }

    #[test]
    fn list_empty_json() {
        let ws = Workspace::empty();
        ws.cmd()
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"count\": 0"));
    }

    #[test]
    fn list_fonts_json() {
        let ws = Workspace::with_fonts();
        let output = ws.cmd().args(["list", "-f", "json"]).output().unwrap();
        assert!(output.status.success());

        let listing: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(listing["status"], "success");
        assert_eq!(listing["count"], 3);
        let files: Vec<&str> = listing["fonts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["filename"].as_str().unwrap())
            .collect();
        assert!(files.contains(&"Example-Bold.ttf"));
        assert!(listing["fonts"][0]["size_mb"].is_number());
    }

    #[test]
    fn list_plain() {
        let ws = Workspace::with_fonts();
        ws.cmd()
            .args(["list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Example-Regular.ttf"))
            .stdout(predicate::str::contains("Example-Italic.ttf"));
    }

    #[test]
    fn css_latin_block() {
        let ws = Workspace::with_fonts();
        ws.cmd()
            .args(["css", "Example:400,700", "--subset", "latin"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("/* latin */\n@font-face {"))
            .stdout(predicate::str::contains("font-weight: 700;"))
            .stdout(predicate::str::contains("format('woff2');"))
            .stdout(predicate::str::contains("unicode-range: U+0000-00FF"));
    }

    #[test]
    fn css_display_flag() {
        let ws = Workspace::with_fonts();
        ws.cmd()
            .args(["css", "Example", "-s", "latin", "--display", "optional"])
            .assert()
            .success()
            .stdout(predicate::str::contains("font-display: optional;"));
    }

    #[test]
    fn css_unknown_family_warns() {
        let ws = Workspace::with_fonts();
        ws.cmd()
            .args(["css", "Nope"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty())
            .stderr(predicate::str::contains("Unknown family: Nope"));
    }

    #[test]
    fn css_unknown_subset_fails() {
        let ws = Workspace::with_fonts();
        ws.cmd()
            .args(["css", "Example", "--subset", "klingon"])
            .assert()
            .failure()
            .code(66)
            .stderr(predicate::str::contains("Unknown subset: klingon"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn css_bad_unicode_range_fails() {
        let ws = Workspace::with_fonts();
        ws.cmd()
            .args(["css", "Example", "--unicode-range", "U+ZZZZ"])
            .assert()
            .failure()
            .code(64)
            .stderr(predicate::str::contains("Invalid unicode-range"));
    }

    #[test]
    fn css_then_fetch() {
        let ws = Workspace::with_fonts();
        let output = ws
            .cmd()
            .args(["css", "Example", "--subset", "latin"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let name = first_subset_name(&String::from_utf8(output.stdout).unwrap());

        let target = ws.path().join("latin.woff2");
        ws.cmd()
            .args(["fetch", &name, "-o"])
            .arg(&target)
            .assert()
            .success();

        let bytes = std::fs::read(&target).unwrap();
        assert_eq!(&bytes[..4], b"wOF2");
    }

    #[test]
    fn fetch_unknown_fingerprint() {
        let ws = Workspace::empty();
        ws.cmd()
            .args(["fetch", &"ab".repeat(32)])
            .assert()
            .failure()
            .code(66)
            .stderr(predicate::str::contains("Cached subset not found"));
    }

    #[test]
    fn warm_then_cache_list() {
        let ws = Workspace::with_fonts();
        ws.cmd().arg("warm").assert().success();

        let output = ws
            .cmd()
            .args(["cache", "list", "--format", "plain"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8(output.stdout).unwrap();
        let names: Vec<&str> = stdout.lines().collect();
        assert!(!names.is_empty());
        assert!(names.iter().all(|n| n.ends_with(".woff2")));
        for name in names {
            assert!(ws.path().join("data/cache").join(name).is_file());
        }
    }

    #[test]
    fn cache_gc_dry_run_keeps_files() {
        let ws = Workspace::with_fonts();
        ws.cmd()
            .args(["css", "Example", "--subset", "latin"])
            .assert()
            .success();
        std::fs::remove_file(ws.path().join("fonts/Example-Regular.ttf")).unwrap();

        ws.cmd()
            .args(["cache", "gc", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Dry run"));
        ws.cmd()
            .args(["cache", "list", "-f", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains(".woff2"));

        ws.cmd().args(["cache", "gc"]).assert().success();
        ws.cmd()
            .args(["cache", "list", "-f", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn cache_clear_with_yes() {
        let ws = Workspace::with_fonts();
        ws.cmd()
            .args(["css", "Example", "--subset", "latin"])
            .assert()
            .success();
        ws.cmd()
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cleared 1 subset(s)"));
    }
}
