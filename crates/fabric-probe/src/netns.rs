//! Network namespace switching for blocking probe work
//!
//! `setns(2)` only affects the calling thread, so namespaced work runs on a
//! dedicated short-lived OS thread that enters the namespace, does its job
//! and leaves. Work in the default namespace goes to tokio's blocking pool.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tracing::error;

/// Where `ip netns` keeps named namespaces
pub const NETNS_RUN_DIR: &str = "/var/run/netns";

const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Keeps the current thread inside a named namespace until dropped
pub struct NetNsGuard {
    original: File,
    name: String,
}

impl NetNsGuard {
    /// Switch the calling thread into `name`
    pub fn enter(name: &str) -> io::Result<Self> {
        let original = File::open(THREAD_NETNS)?;
        let target = File::open(namespace_path(name)?)?;
        setns(target.as_raw_fd())?;
        Ok(Self {
            original,
            name: name.to_string(),
        })
    }
}

impl Drop for NetNsGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(self.original.as_raw_fd()) {
            error!("Failed to leave network namespace {}: {}", self.name, e);
        }
    }
}

/// Path of a named namespace, rejecting names that escape the run directory
pub fn namespace_path(name: &str) -> io::Result<PathBuf> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid namespace name: {:?}", name),
        ));
    }
    Ok(Path::new(NETNS_RUN_DIR).join(name))
}

fn setns(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fd` is a namespace file descriptor kept open by the caller.
    let rc = unsafe { libc::setns(fd, libc::CLONE_NEWNET) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Run blocking `work`, inside `namespace` when one is given
pub async fn run_blocking<T, F>(namespace: Option<&str>, work: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let Some(name) = namespace else {
        return tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| io::Error::other(e.to_string()))?;
    };

    let name = name.to_string();
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("fabric-netns".to_string())
        .spawn(move || {
            let outcome = NetNsGuard::enter(&name).and_then(|_guard| work());
            let _ = tx.send(outcome);
        })?;

    rx.await
        .map_err(|_| io::Error::other("namespace worker exited without a result"))?
}
