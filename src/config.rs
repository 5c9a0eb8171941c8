//! Declarative desired-state schema.
//!
//! Parses the YAML shape `{ defaults, repositories[] }` that a
//! [`crate::pool::RepositoryPool`] is constructed from or reconciled
//! against. Loading the file from disk and watching it for changes is an
//! external collaborator's job; this module only defines and consumes the
//! parsed shape.

use std::time::Duration;

use serde::Deserialize;

use crate::error::MirrorError;

/// Garbage-collection mode applied after a mirror cycle that updated refs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GcMode {
    Auto,
    Always,
    Aggressive,
    Off,
}

impl Default for GcMode {
    fn default() -> Self {
        GcMode::Always
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_mirror_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_ssh_key_path() -> String {
    "/etc/git-secret/ssh".to_string()
}

fn default_ssh_known_hosts_path() -> String {
    "/etc/git-secret/known_hosts".to_string()
}

fn default_root() -> String {
    std::env::temp_dir()
        .join("git-mirror")
        .join("src")
        .to_string_lossy()
        .into_owned()
}

fn default_ref() -> String {
    "HEAD".to_string()
}

/// SSH auth material for fetching over scp-like or ssh remotes. Either
/// field may be empty, in which case [`crate::git::ssh_command`] falls back
/// to its insecure defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    #[serde(default = "default_ssh_key_path")]
    pub ssh_key_path: String,
    #[serde(default = "default_ssh_known_hosts_path")]
    pub ssh_known_hosts_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            ssh_key_path: default_ssh_key_path(),
            ssh_known_hosts_path: default_ssh_known_hosts_path(),
        }
    }
}

/// Durations in the YAML source are humantime strings (`"30s"`, `"2m"`).
fn deserialize_humantime<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_humantime_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

/// Fields shared between `defaults` and a per-repository override.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Defaults {
    #[serde(default = "default_root")]
    pub root: String,
    pub link_root: Option<String>,
    #[serde(default = "default_interval", deserialize_with = "deserialize_humantime")]
    pub interval: Duration,
    #[serde(
        default = "default_mirror_timeout",
        deserialize_with = "deserialize_humantime"
    )]
    pub mirror_timeout: Duration,
    #[serde(default)]
    pub git_gc: GcMode,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            root: default_root(),
            link_root: None,
            interval: default_interval(),
            mirror_timeout: default_mirror_timeout(),
            git_gc: GcMode::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// One worktree entry under a repository. `link` is synthesized from the
/// repo name and ref when omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorktreeConfig {
    pub link: Option<String>,
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
    #[serde(default)]
    pub pathspecs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RepoConfig {
    pub remote: String,
    pub root: Option<String>,
    pub link_root: Option<String>,
    #[serde(default, deserialize_with = "deserialize_humantime_opt")]
    pub interval: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_humantime_opt")]
    pub mirror_timeout: Option<Duration>,
    pub git_gc: Option<GcMode>,
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub worktrees: Vec<WorktreeConfig>,
}

/// Top-level desired-state document.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct DesiredState {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub repositories: Vec<RepoConfig>,
}

impl DesiredState {
    pub fn from_yaml(source: &str) -> Result<Self, MirrorError> {
        serde_yaml::from_str(source).map_err(|e| MirrorError::ConfigInvalid(e.to_string()))
    }
}

/// Derive the repo name used for the default link synthesis and the bare
/// repo's directory, from a parsed remote URL's final path component.
pub fn repo_name_from_url(url: &crate::git::RemoteUrl) -> String {
    url.repo_name().trim_end_matches(".git").to_string()
}

/// Synthesize `link` for a worktree entry that omitted it:
/// `<repoName>/<ref>`.
pub fn synthesize_link(repo_name: &str, git_ref: &str) -> String {
    format!("{repo_name}/{git_ref}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let yaml = r#"
repositories:
  - remote: git@github.com:example/repo.git
"#;
        let state = DesiredState::from_yaml(yaml).unwrap();
        assert_eq!(state.repositories.len(), 1);
        assert_eq!(state.defaults.git_gc, GcMode::Always);
        assert_eq!(state.defaults.interval, Duration::from_secs(30));
        assert_eq!(state.defaults.mirror_timeout, Duration::from_secs(120));
    }

    #[test]
    fn parses_full_document_with_overrides() {
        let yaml = r#"
defaults:
  root: /var/lib/git-mirror
  interval: 1m
  mirror-timeout: 5m
  git-gc: aggressive
repositories:
  - remote: https://example.com/org/repo.git
    interval: 10s
    worktrees:
      - link: app/main
        ref: main
        pathspecs: ["src", "docs"]
      - {}
"#;
        let state = DesiredState::from_yaml(yaml).unwrap();
        assert_eq!(state.defaults.root, "/var/lib/git-mirror");
        assert_eq!(state.defaults.interval, Duration::from_secs(60));
        assert_eq!(state.defaults.git_gc, GcMode::Aggressive);

        let repo = &state.repositories[0];
        assert_eq!(repo.interval, Some(Duration::from_secs(10)));
        assert_eq!(repo.worktrees.len(), 2);
        assert_eq!(repo.worktrees[0].link.as_deref(), Some("app/main"));
        assert_eq!(repo.worktrees[1].git_ref, "HEAD");
        assert!(repo.worktrees[1].link.is_none());
    }

    #[test]
    fn synthesizes_link_from_repo_name_and_ref() {
        assert_eq!(synthesize_link("repo", "HEAD"), "repo/HEAD");
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(DesiredState::from_yaml("not: [valid").is_err());
    }
}
