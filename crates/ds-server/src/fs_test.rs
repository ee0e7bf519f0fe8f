use super::*;

fn jail(allow: &[&str], deny: &[&str]) -> FilestoreJail {
    FilestoreJail {
        jail: "assets".to_string(),
        root: "files/assets".to_string(),
        allow_extensions: allow.iter().map(|s| s.to_string()).collect(),
        deny_extensions: deny.iter().map(|s| s.to_string()).collect(),
        max_bytes: 1024,
    }
}

#[test]
fn test_sanitize_rejects_traversal() {
    assert!(sanitize("../secrets.env").is_none());
    assert!(sanitize("a/../../b").is_none());
    assert!(sanitize("/etc/passwd").is_none());
    assert!(sanitize("").is_none());
}

#[test]
fn test_sanitize_accepts_nested_paths() {
    assert_eq!(sanitize("a/b/c.csv"), Some(PathBuf::from("a/b/c.csv")));
    assert_eq!(sanitize("./a/b.json"), Some(PathBuf::from("a/b.json")));
}

#[test]
fn test_allow_list_restricts() {
    let jail = jail(&["parquet", "csv"], &[]);
    assert!(extension_allowed(&jail, Path::new("data.parquet")));
    assert!(extension_allowed(&jail, Path::new("DATA.CSV")));
    assert!(!extension_allowed(&jail, Path::new("run.sh")));
    assert!(!extension_allowed(&jail, Path::new("no_extension")));
}

#[test]
fn test_deny_list_wins() {
    let jail = jail(&[], &["env"]);
    assert!(extension_allowed(&jail, Path::new("data.csv")));
    assert!(!extension_allowed(&jail, Path::new("secrets.env")));
}
