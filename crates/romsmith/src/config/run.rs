use std::path::PathBuf;

use crate::config::DeviceDescriptor;

pub const DEFAULT_MIN_FREE_GB: u64 = 300;

/// Flags from the command line. Every flag is independent of the others.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub build_root: PathBuf,
    pub config_dir: PathBuf,
    pub skip_sync: bool,
    pub skip_clone: bool,
    pub clean_repos: bool,
    pub clean_first: bool,
    pub jobs: usize,
    pub min_free_gb: u64,
    pub assume_yes: bool,
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            build_root: PathBuf::from("android"),
            config_dir: PathBuf::from("devices"),
            skip_sync: false,
            skip_clone: false,
            clean_repos: false,
            clean_first: false,
            jobs: num_cpus::get().max(1),
            min_free_gb: DEFAULT_MIN_FREE_GB,
            assume_yes: false,
            dry_run: false,
        }
    }
}

impl RunConfig {
    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_gb.saturating_mul(1024 * 1024 * 1024)
    }
}

/// Everything a stage needs, built once before the pipeline starts.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub device: DeviceDescriptor,
    pub run: RunConfig,
}

impl BuildRequest {
    pub fn new(device: DeviceDescriptor, run: RunConfig) -> Self {
        Self { device, run }
    }

    /// Human-readable summary shown before the confirmation prompt.
    pub fn summary(&self) -> String {
        let d = &self.device;
        let r = &self.run;
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        let mut out = String::new();
        out.push_str("Build configuration:\n");
        out.push_str(&format!(
            "  device:        {} ({}, {})\n",
            d.codename, d.full_name, d.manufacturer
        ));
        out.push_str(&format!("  descriptor:    {}\n", d.source.display()));
        out.push_str(&format!("  variant:       {}\n", d.variant));
        out.push_str(&format!("  lunch combo:   {}\n", d.lunch_combo()));
        out.push_str(&format!("  build target:  {}\n", d.build_target));
        out.push_str(&format!(
            "  manifest:      {} ({})\n",
            d.manifest.url, d.manifest.branch
        ));
        out.push_str(&format!("  build root:    {}\n", r.build_root.display()));
        out.push_str(&format!("  jobs:          {}\n", r.jobs));
        out.push_str(&format!("  skip sync:     {}\n", yes_no(r.skip_sync)));
        out.push_str(&format!("  skip clone:    {}\n", yes_no(r.skip_clone)));
        out.push_str(&format!("  clean repos:   {}\n", yes_no(r.clean_repos)));
        out.push_str(&format!("  clean build:   {}\n", yes_no(r.clean_first)));
        if r.dry_run {
            out.push_str("  dry run:       yes\n");
        }
        out.push_str("  repositories:\n");
        if d.repositories.is_empty() {
            out.push_str("    (none)\n");
        }
        for repo in &d.repositories {
            out.push_str(&format!(
                "    {:<16} {} -> {}{}\n",
                repo.key,
                repo.url.as_deref().unwrap_or("<no url>"),
                repo.path.as_deref().unwrap_or("<no path>"),
                if repo.optional { " (optional)" } else { "" }
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn summary_lists_flags_and_repositories() {
        let device = crate::config::parse(
            Path::new("devices/pixel7.json"),
            r#"{"device": {"codename": "pixel7", "full_name": "Pixel 7", "manufacturer": "google"},
                "repositories": {"vendor": {"url": null, "path": "vendor/google/pixel7", "optional": true}}}"#,
            None,
        )
        .expect("parse");
        let req = BuildRequest::new(
            device,
            RunConfig {
                skip_sync: true,
                jobs: 8,
                ..RunConfig::default()
            },
        );
        let s = req.summary();
        assert!(s.contains("pixel7 (Pixel 7, google)"));
        assert!(s.contains("skip sync:     yes"));
        assert!(s.contains("skip clone:    no"));
        assert!(s.contains("jobs:          8"));
        assert!(s.contains("<no url> -> vendor/google/pixel7 (optional)"));
    }

    #[test]
    fn min_free_bytes_scales_gigabytes() {
        let r = RunConfig {
            min_free_gb: 2,
            ..RunConfig::default()
        };
        assert_eq!(r.min_free_bytes(), 2 * 1024 * 1024 * 1024);
    }
}
