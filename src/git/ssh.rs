//! `GIT_SSH_COMMAND` composition for scp-like and ssh remotes.

/// Build the `GIT_SSH_COMMAND` value for a fetch against an SSH-style
/// remote.
///
/// Base: `ssh -q -F none -o IdentitiesOnly=yes -o IdentityFile=<key>`; if no
/// key is configured, `<key>` is `/dev/null`. If both a key and a
/// known-hosts file are configured, append
/// `-o UserKnownHostsFile=<hosts>`; otherwise append
/// `-o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no`.
pub fn ssh_command(ssh_key_path: Option<&str>, ssh_known_hosts_path: Option<&str>) -> String {
    let key = ssh_key_path.filter(|s| !s.is_empty()).unwrap_or("/dev/null");
    let mut cmd = format!("ssh -q -F none -o IdentitiesOnly=yes -o IdentityFile={key}");

    match (
        ssh_key_path.filter(|s| !s.is_empty()),
        ssh_known_hosts_path.filter(|s| !s.is_empty()),
    ) {
        (Some(_), Some(hosts)) => {
            cmd.push_str(&format!(" -o UserKnownHostsFile={hosts}"));
        }
        _ => {
            cmd.push_str(" -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no");
        }
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_no_hosts() {
        let cmd = ssh_command(None, None);
        assert_eq!(
            cmd,
            "ssh -q -F none -o IdentitiesOnly=yes -o IdentityFile=/dev/null \
             -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no"
        );
    }

    #[test]
    fn key_without_hosts_disables_strict_checking() {
        let cmd = ssh_command(Some("/etc/git-secret/ssh"), None);
        assert_eq!(
            cmd,
            "ssh -q -F none -o IdentitiesOnly=yes -o IdentityFile=/etc/git-secret/ssh \
             -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no"
        );
    }

    #[test]
    fn key_and_hosts_both_configured() {
        let cmd = ssh_command(
            Some("/etc/git-secret/ssh"),
            Some("/etc/git-secret/known_hosts"),
        );
        assert_eq!(
            cmd,
            "ssh -q -F none -o IdentitiesOnly=yes -o IdentityFile=/etc/git-secret/ssh \
             -o UserKnownHostsFile=/etc/git-secret/known_hosts"
        );
    }

    #[test]
    fn hosts_without_key_falls_back_to_insecure() {
        let cmd = ssh_command(None, Some("/etc/git-secret/known_hosts"));
        assert_eq!(
            cmd,
            "ssh -q -F none -o IdentitiesOnly=yes -o IdentityFile=/dev/null \
             -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no"
        );
    }
}
