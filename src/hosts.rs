use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

#[cfg(windows)]
pub const HOSTS_FILE: &str = r"C:\Windows\System32\drivers\etc\hosts";
#[cfg(not(windows))]
pub const HOSTS_FILE: &str = "/etc/hosts";

const MARKER: &str = "# added by rasactl";

fn permission_hint(err: std::io::Error, path: &Path) -> anyhow::Error {
    if err.kind() == ErrorKind::PermissionDenied {
        anyhow::anyhow!(
            "can't modify {}, administrator permissions are required, please run the command with sudo",
            path.display()
        )
    } else {
        anyhow::Error::new(err).context(format!("update {}", path.display()))
    }
}

/// Fail early when the hosts file can't be modified.
pub fn ensure_writable(path: &Path) -> Result<()> {
    std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|e| permission_hint(e, path))
}

fn has_host(line: &str, host: &str) -> bool {
    let line = line.split('#').next().unwrap_or_default();
    line.split_whitespace().skip(1).any(|h| h == host)
}

/// Add `ip host` unless the host is already mapped.
pub fn add_host(path: &Path, host: &str, ip: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    if content.lines().any(|l| has_host(l, host)) {
        debug!(host, "host entry already present");
        return Ok(());
    }

    let mut updated = content;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&format!("{}\t{} {}\n", ip, host, MARKER));
    std::fs::write(path, updated).map_err(|e| permission_hint(e, path))?;
    debug!(host, ip, "host entry added");
    Ok(())
}

fn is_ours(line: &str, host: &str) -> bool {
    has_host(line, host) && line.trim_end().ends_with(MARKER)
}

/// Remove the lines mapping `host` that rasactl added.
pub fn remove_host(path: &Path, host: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    if !content.lines().any(|l| is_ours(l, host)) {
        return Ok(());
    }
    let mut kept: String = content
        .lines()
        .filter(|l| !is_ours(l, host))
        .collect::<Vec<_>>()
        .join("\n");
    kept.push('\n');
    std::fs::write(path, kept).map_err(|e| permission_hint(e, path))?;
    debug!(host, "host entry removed");
    Ok(())
}
