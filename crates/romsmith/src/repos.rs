//! Turns the descriptor's `repositories` mapping into clone work, one entry at a time.
//!
//! Entries are resolved lazily and in file order so that a required entry with no
//! url stops the clone stage only when it is reached. Repositories cloned before it
//! stay on disk.

use crate::config::{DeviceDescriptor, RepositoryEntry};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepo {
    pub key: String,
    pub url: String,
    pub branch: Option<String>,
    pub path: String,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Clone(ResolvedRepo),
    Skip { key: String, reason: String },
}

fn trimmed(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

pub fn resolve_entry(entry: &RepositoryEntry) -> Result<Resolution> {
    let Some(url) = trimmed(entry.url.as_deref()) else {
        if entry.optional {
            return Ok(Resolution::Skip {
                key: entry.key.clone(),
                reason: "no url configured for optional repository".into(),
            });
        }
        return Err(Error::config(format!(
            "required repository '{}' has no url",
            entry.key
        )));
    };
    let Some(path) = trimmed(entry.path.as_deref()) else {
        if entry.optional {
            return Ok(Resolution::Skip {
                key: entry.key.clone(),
                reason: "no path configured for optional repository".into(),
            });
        }
        return Err(Error::config(format!(
            "required repository '{}' has no path",
            entry.key
        )));
    };

    Ok(Resolution::Clone(ResolvedRepo {
        key: entry.key.clone(),
        url: url.to_string(),
        branch: trimmed(entry.branch.as_deref()).map(ToOwned::to_owned),
        path: path.to_string(),
        optional: entry.optional,
    }))
}

pub fn resolve_all(device: &DeviceDescriptor) -> impl Iterator<Item = Result<Resolution>> + '_ {
    device.repositories.iter().map(resolve_entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, url: Option<&str>, optional: bool) -> RepositoryEntry {
        RepositoryEntry {
            key: key.into(),
            url: url.map(Into::into),
            branch: Some("lineage-21".into()),
            path: Some(format!("device/test/{key}")),
            optional,
        }
    }

    #[test]
    fn optional_without_url_is_skipped() {
        let got = resolve_entry(&entry("vendor", None, true)).expect("resolve");
        assert!(matches!(got, Resolution::Skip { ref key, .. } if key == "vendor"));

        let got = resolve_entry(&entry("vendor", Some("   "), true)).expect("resolve");
        assert!(matches!(got, Resolution::Skip { .. }));
    }

    #[test]
    fn required_without_url_fails() {
        let err = resolve_entry(&entry("device_tree", None, false)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert!(err.to_string().contains("'device_tree' has no url"));
    }

    #[test]
    fn resolved_entry_carries_branch_and_path() {
        let got = resolve_entry(&entry("kernel", Some("https://example.com/k.git"), false))
            .expect("resolve");
        assert_eq!(
            got,
            Resolution::Clone(ResolvedRepo {
                key: "kernel".into(),
                url: "https://example.com/k.git".into(),
                branch: Some("lineage-21".into()),
                path: "device/test/kernel".into(),
                optional: false,
            })
        );
    }

    #[test]
    fn resolve_all_is_lazy_and_ordered() {
        let device = crate::config::parse(
            std::path::Path::new("<mem>"),
            r#"{"device": {"codename": "a"}, "repositories": {
                "first": {"url": "https://example.com/1.git", "path": "p/1"},
                "broken": {"url": null, "path": "p/2"},
                "never": {"url": "https://example.com/3.git", "path": "p/3"}
            }}"#,
            None,
        )
        .expect("parse");

        let mut it = resolve_all(&device);
        assert!(matches!(it.next(), Some(Ok(Resolution::Clone(ref r))) if r.key == "first"));
        assert!(matches!(it.next(), Some(Err(_))));
    }
}
