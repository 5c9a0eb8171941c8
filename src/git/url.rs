//! Remote Git URL parsing.
//!
//! Classifies a remote URL into one of four shapes (scp-like, ssh, https,
//! local-file) and extracts host/path/repo, with an equivalence relation
//! that ignores scheme and embedded user.

use once_cell::sync::Lazy;
use regex::Regex;

/// The matched shape of a parsed remote URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum UrlScheme {
    Scp,
    Ssh,
    Https,
    Local,
}

/// A parsed remote URL. Immutable once constructed.
///
/// Equivalence ([`RemoteUrl::same_as`]) ignores `scheme` and `user`: two
/// URLs naming the same host/path/repo are the same remote no matter which
/// transport or user they were written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    pub scheme: UrlScheme,
    pub user: String,
    pub host: String,
    pub path: String,
    pub repo: String,
}

const USER_HOST_CHARS: &str = r"[A-Za-z0-9._-]";

static SCP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^(?:({u}+)@)?({u}+)\:(.*)$", u = USER_HOST_CHARS)).unwrap()
});

static SSH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^ssh://(?:({u}+)@)?({u}+)(?::(\d+))?/(.*)$",
        u = USER_HOST_CHARS
    ))
    .unwrap()
});

static HTTPS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^https://({u}+)(?::(\d+))?/(.*)$", u = USER_HOST_CHARS)).unwrap());

static LOCAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^file://(/.*)$").unwrap());

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^{u}+$", u = USER_HOST_CHARS)).unwrap());

/// Path segment grammar: a series of `[A-Za-z0-9._-]+/` segments followed
/// by a non-empty final repo-name segment (which may carry a `.git` suffix).
fn split_path_and_repo(raw: &str) -> Option<(String, String)> {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    let (repo_raw, path_segments) = segments.split_last().unwrap();
    for seg in path_segments {
        if !SEGMENT_RE.is_match(seg) {
            return None;
        }
    }
    let repo_stem = repo_raw.strip_suffix(".git").unwrap_or(repo_raw);
    if repo_stem.is_empty() || !SEGMENT_RE.is_match(repo_stem) {
        return None;
    }

    Some((path_segments.join("/"), repo_raw.to_string()))
}

impl RemoteUrl {
    /// Parse a remote URL, normalising (lowercase + strip trailing `/`)
    /// first.
    ///
    /// Matches, in order, scp-like, ssh, https, local-file. `http://` is
    /// rejected (not one of the four shapes).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalised = raw.trim().to_lowercase();
        let normalised = normalised.trim_end_matches('/');

        if normalised.starts_with("http://") {
            return None;
        }

        if let Some(caps) = LOCAL_RE.captures(normalised) {
            let (path, repo) = split_path_and_repo(&caps[1])?;
            return Some(Self {
                scheme: UrlScheme::Local,
                user: String::new(),
                host: String::new(),
                path,
                repo,
            });
        }

        if let Some(caps) = HTTPS_RE.captures(normalised) {
            let host = caps[1].to_string();
            let (path, repo) = split_path_and_repo(&caps[3])?;
            return Some(Self {
                scheme: UrlScheme::Https,
                user: String::new(),
                host,
                path,
                repo,
            });
        }

        if let Some(caps) = SSH_RE.captures(normalised) {
            let user = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            let host = caps[2].to_string();
            let (path, repo) = split_path_and_repo(&caps[4])?;
            return Some(Self {
                scheme: UrlScheme::Ssh,
                user,
                host,
                path,
                repo,
            });
        }

        if normalised.contains("://") {
            return None;
        }

        if let Some(caps) = SCP_RE.captures(normalised) {
            let user = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            let host = caps[2].to_string();
            let (path, repo) = split_path_and_repo(&caps[3])?;
            return Some(Self {
                scheme: UrlScheme::Scp,
                user,
                host,
                path,
                repo,
            });
        }

        None
    }

    /// Two parsed URLs name the same remote iff host, path, and repo
    /// match. Scheme and user are ignored.
    pub fn same_as(&self, other: &RemoteUrl) -> bool {
        self.host == other.host && self.path == other.path && self.repo == other.repo
    }

    /// The final repo name component, with any trailing `.git` preserved
    /// as given in the URL.
    pub fn repo_name(&self) -> &str {
        &self.repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scp_like() {
        let u = RemoteUrl::parse("git@github.com:owner/repo.git").unwrap();
        assert_eq!(u.scheme, UrlScheme::Scp);
        assert_eq!(u.user, "git");
        assert_eq!(u.host, "github.com");
        assert_eq!(u.path, "owner");
        assert_eq!(u.repo, "repo.git");
    }

    #[test]
    fn parses_ssh() {
        let u = RemoteUrl::parse("ssh://git@host.xz:2222/path/to/repo.git").unwrap();
        assert_eq!(u.scheme, UrlScheme::Ssh);
        assert_eq!(u.host, "host.xz");
        assert_eq!(u.path, "path/to");
        assert_eq!(u.repo, "repo.git");
    }

    #[test]
    fn parses_https() {
        let u = RemoteUrl::parse("https://host.xz/path/to/repo.git").unwrap();
        assert_eq!(u.scheme, UrlScheme::Https);
        assert_eq!(u.path, "path/to");
        assert_eq!(u.repo, "repo.git");
    }

    #[test]
    fn parses_local() {
        let u = RemoteUrl::parse("file:///path/to/repo.git").unwrap();
        assert_eq!(u.scheme, UrlScheme::Local);
        assert_eq!(u.path, "path/to");
        assert_eq!(u.repo, "repo.git");
    }

    #[test]
    fn rejects_http() {
        assert!(RemoteUrl::parse("http://host.xz/path/repo.git").is_none());
    }

    #[test]
    fn rejects_empty_repo_or_dot_git() {
        assert!(RemoteUrl::parse("https://host.xz/path/.git").is_none());
        assert!(RemoteUrl::parse("https://host.xz/").is_none());
        assert!(RemoteUrl::parse("git@host.xz:").is_none());
    }

    #[test]
    fn malformed_scheme_url_does_not_fall_through_to_scp() {
        assert!(RemoteUrl::parse("https://host.xz/").is_none());
        assert!(RemoteUrl::parse("ssh://host.xz/").is_none());
        assert!(RemoteUrl::parse("file://").is_none());
    }

    #[test]
    fn equivalence_ignores_scheme_and_user() {
        let a = RemoteUrl::parse("git@host.xz:path/to/repo.git").unwrap();
        let b = RemoteUrl::parse("ssh://other@host.xz/path/to/repo.git").unwrap();
        let c = RemoteUrl::parse("https://host.xz/path/to/repo.git").unwrap();
        assert!(a.same_as(&b));
        assert!(b.same_as(&c));
        assert!(a.same_as(&c));
    }

    #[test]
    fn normalisation_lowercases_and_strips_trailing_slash() {
        let a = RemoteUrl::parse("HTTPS://HOST.XZ/Path/To/Repo.git/").unwrap();
        let b = RemoteUrl::parse("https://host.xz/path/to/repo.git").unwrap();
        assert_eq!(a, b);
    }
}
