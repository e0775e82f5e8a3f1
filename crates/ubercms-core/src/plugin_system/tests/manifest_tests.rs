use std::path::{Path, PathBuf};

use crate::plugin_system::descriptor::PluginState;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::version::{ApiVersion, PluginVersion};

const BLOG_ID: &str = "6f1f0c1e-2c1d-4a5e-9a57-3f0f2f5f7a11";

fn manifest_json(id: &str, class_path: &str, version: &str) -> String {
    serde_json::json!({
        "id": id,
        "title": "Blog",
        "class_path": class_path,
        "version": version,
        "priority": 4,
        "api_versions": ["^0.1"],
        "description": "Posts and archives"
    })
    .to_string()
}

#[test]
fn test_parse_valid_manifest() {
    let path = Path::new("/srv/cms/plugins/blog/plugin.json");
    let manifest = PluginManifest::from_json(&manifest_json(BLOG_ID, " demo::Blog ", "1.4.2"), path).unwrap();

    assert_eq!(manifest.id.to_string(), BLOG_ID);
    assert_eq!(manifest.title, "Blog");
    assert_eq!(manifest.class_path, "demo::Blog");
    assert_eq!(manifest.version, PluginVersion::new(1, 4, 2));
    assert_eq!(manifest.priority, 4);
    assert_eq!(manifest.description.as_deref(), Some("Posts and archives"));
    assert_eq!(manifest.plugin_base_dir, PathBuf::from("/srv/cms/plugins/blog"));
    assert!(manifest.supports_api(&ApiVersion::new(0, 1, 3)));
    assert!(!manifest.supports_api(&ApiVersion::new(1, 0, 0)));
}

#[test]
fn test_optional_fields_default() {
    let content = format!(
        r#"{{"id": "{}", "title": "Tiny", "class_path": "demo::Tiny", "version": "0.0.1"}}"#,
        BLOG_ID
    );
    let manifest = PluginManifest::from_json(&content, Path::new("tiny/plugin.json")).unwrap();
    assert_eq!(manifest.priority, 0);
    assert!(manifest.api_versions.is_empty());
    assert!(manifest.supports_api(&ApiVersion::new(9, 9, 9)), "no ranges means any API");
}

#[test]
fn test_invalid_fields_are_manifest_errors() {
    let path = Path::new("plugins/blog/plugin.json");
    for content in [
        manifest_json("not-a-uuid", "demo::Blog", "1.0.0"),
        manifest_json(BLOG_ID, "   ", "1.0.0"),
        manifest_json(BLOG_ID, "demo::Blog", "1.0"),
        "{ not json".to_string(),
    ] {
        match PluginManifest::from_json(&content, path) {
            Err(PluginSystemError::ManifestError { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected manifest error for {}, got {:?}", content, other.map(|m| m.id)),
        }
    }
}

#[test]
fn test_to_descriptor_is_not_installed() {
    let manifest =
        PluginManifest::from_json(&manifest_json(BLOG_ID, "demo::Blog", "1.0.0"), Path::new("p/blog/plugin.json"))
            .unwrap();
    let descriptor = manifest.to_descriptor();
    assert_eq!(descriptor.id(), manifest.id);
    assert_eq!(descriptor.state, PluginState::NotInstalled);
    assert_eq!(descriptor.directory, PathBuf::from("p/blog"));
    assert_eq!(descriptor.class_path, "demo::Blog");
    assert_eq!(descriptor.priority, 4);
}
