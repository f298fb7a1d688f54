use assert_matches::assert_matches;

use crucible_client::config::{Config, ConfigLoader};
use crucible_client::error::CrucibleError;
use crucible_client::parsers::frontmatter::FrontmatterStyle;

#[test]
fn save_then_load_keeps_every_field() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nested").join("config.json");
    let config = Config {
        api_url: Some("https://archive.example/api/v1".to_string()),
        api_key: Some("secret".to_string()),
        graph_explorer_url: Some("https://graph.example".to_string()),
        current_project: Some("demo".to_string()),
        web_host: Some("archive.example".to_string()),
        frontmatter_parser: Some(FrontmatterStyle::Lines),
        timeout_secs: Some(30),
    };

    ConfigLoader::save(&path, &config).unwrap();
    assert_eq!(ConfigLoader::load(&path).unwrap(), config);

    let resolved = ConfigLoader::resolve(Some(&path)).unwrap();
    assert_eq!(resolved.current_project.as_deref(), Some("demo"));
    assert_eq!(resolved.frontmatter_parser, FrontmatterStyle::Lines);
    assert_eq!(resolved.timeout_secs, 30);
}

#[test]
fn unknown_fields_are_tolerated_and_missing_ones_default() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.json");
    std::fs::write(
        &path,
        r#"{"api_url": "https://archive.example/api/v1", "legacy": true}"#,
    )
    .unwrap();

    let config = ConfigLoader::load(&path).unwrap();
    assert_eq!(config.api_key, None);
    assert_eq!(config.frontmatter_parser, None);
}

#[test]
fn explicit_missing_path_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(CrucibleError::MissingConfig(missing)) if missing == path
    );
}

#[test]
fn malformed_file_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_matches!(ConfigLoader::load(&path), Err(CrucibleError::ConfigParse(_)));
}

#[test]
fn offline_commands_tolerate_a_missing_config() {
    let temp = tempfile::tempdir().unwrap();
    let absent = temp.path().join("absent.json");
    assert!(ConfigLoader::resolve_if_present(Some(&absent)).unwrap().is_none());

    let present = temp.path().join("config.json");
    std::fs::write(
        &present,
        r#"{"api_url": "https://archive.example/api/v1", "web_host": "archive.example"}"#,
    )
    .unwrap();
    let resolved = ConfigLoader::resolve_if_present(Some(&present))
        .unwrap()
        .unwrap();
    assert_eq!(resolved.web_host.as_deref(), Some("archive.example"));

    std::fs::write(&present, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve_if_present(Some(&present)),
        Err(CrucibleError::ConfigParse(_))
    );
}
