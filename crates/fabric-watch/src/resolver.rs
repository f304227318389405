//! Name override publishing
//!
//! The elected controller address reaches the rest of the node through a
//! hosts-format override file (`<address> <name> [aliases...]`). Publishing
//! removes every prior entry for the name and appends the new one, replacing
//! the file atomically.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("override file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("resolver task failed: {0}")]
    Task(String),
}

/// Where the elected address is published
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Address currently published for `name`
    async fn current(&self, name: &str) -> Result<Option<String>, ResolverError>;

    /// Replace whatever `name` resolves to with `address`
    async fn publish(&self, name: &str, address: &str) -> Result<(), ResolverError>;
}

/// First address mapped to `name` in hosts-format `contents`
pub fn lookup(contents: &str, name: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let mut fields = strip_comment(line).split_whitespace();
        let address = fields.next()?;
        fields
            .any(|field| field == name)
            .then(|| address.to_string())
    })
}

/// `contents` with `name` removed from every line and `address name` appended
///
/// Lines left without any name are dropped; comments and unrelated lines are
/// kept verbatim.
pub fn rewrite(contents: &str, name: &str, address: &str) -> String {
    let mut out = String::with_capacity(contents.len() + address.len() + name.len() + 2);

    for line in contents.lines() {
        let mut fields = strip_comment(line).split_whitespace();
        let Some(first) = fields.next() else {
            out.push_str(line);
            out.push('\n');
            continue;
        };
        let names: Vec<&str> = fields.collect();
        if !names.contains(&name) {
            out.push_str(line);
            out.push('\n');
            continue;
        }

        let remaining: Vec<&str> = names.into_iter().filter(|n| *n != name).collect();
        if !remaining.is_empty() {
            out.push_str(first);
            out.push('\t');
            out.push_str(&remaining.join(" "));
            out.push('\n');
        }
    }

    out.push_str(address);
    out.push('\t');
    out.push_str(name);
    out.push('\n');
    out
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or_default()
}

/// Hosts-format override file
#[derive(Debug, Clone)]
pub struct HostsFileResolver {
    path: PathBuf,
}

impl HostsFileResolver {
    /// Resolver editing the hosts-format file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Override file being edited
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> io::Result<String> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, ResolverError>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> io::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || work(path))
            .await
            .map_err(|e| ResolverError::Task(e.to_string()))?
            .map_err(|source| ResolverError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl Resolver for HostsFileResolver {
    async fn current(&self, name: &str) -> Result<Option<String>, ResolverError> {
        let name = name.to_string();
        self.blocking(move |path| Ok(lookup(&Self::read(&path)?, &name)))
            .await
    }

    async fn publish(&self, name: &str, address: &str) -> Result<(), ResolverError> {
        let name = name.to_string();
        let address = address.to_string();
        self.blocking(move |path| {
            let updated = rewrite(&Self::read(&path)?, &name, &address);

            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let mut file = tempfile::NamedTempFile::new_in(&dir)?;
            file.write_all(updated.as_bytes())?;
            file.as_file().sync_all()?;
            file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
    }
}

/// In-process resolver counting publishes
#[derive(Debug, Default)]
pub struct MemoryResolver {
    entries: Mutex<HashMap<String, String>>,
    publishes: AtomicUsize,
}

impl MemoryResolver {
    /// Empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed an entry without counting a publish
    pub fn with_entry(self, name: &str, address: &str) -> Self {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(name.to_string(), address.to_string());
        }
        self
    }

    /// Number of publishes that reached the resolver
    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for MemoryResolver {
    async fn current(&self, name: &str) -> Result<Option<String>, ResolverError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| ResolverError::Task("resolver lock poisoned".to_string()))?
            .get(name)
            .cloned())
    }

    async fn publish(&self, name: &str, address: &str) -> Result<(), ResolverError> {
        self.entries
            .lock()
            .map_err(|_| ResolverError::Task("resolver lock poisoned".to_string()))?
            .insert(name.to_string(), address.to_string());
        self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
