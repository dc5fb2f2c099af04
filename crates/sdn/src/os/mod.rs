//! Host access: external commands, netlink connections and files.

mod cmd;

pub use cmd::CommandRunner;

use std::path::{Path, PathBuf};

use nlink::netlink::{Connection, Route, namespace};

use crate::Result;
use crate::items::MAIN_NS;

/// Directory holding named network namespaces.
pub const NETNS_RUN_DIR: &str = "/var/run/netns";

/// Directory holding per-namespace configuration files (resolv.conf).
pub const NETNS_ETC_DIR: &str = "/etc/netns";

/// Route-protocol connection operating inside the given namespace.
pub fn connection(netns: &str) -> Result<Connection<Route>> {
    if netns == MAIN_NS {
        Ok(Connection::<Route>::new()?)
    } else {
        Ok(namespace::connection_for(netns)?)
    }
}

pub fn netns_path(netns: &str) -> PathBuf {
    Path::new(NETNS_RUN_DIR).join(netns)
}

/// Write a file, creating its parent directories.
pub async fn write_file(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Remove files, logging the ones that could not be removed.
pub async fn remove_files<'a>(paths: impl IntoIterator<Item = &'a Path>) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove file"),
        }
    }
}
