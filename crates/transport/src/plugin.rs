//! Transport plugin loading.
//!
//! A plugin artifact exports two entry points: `create_plugin`, a factory
//! producing a [`Transport`], and `get_plugin_version`, returning the
//! capability version string. The [`PluginLoader`] resolves an artifact
//! through an [`ArtifactResolver`], checks the version and wraps the
//! produced transport so the artifact outlives it.
//!
//! Acquired artifacts are guards: dropping one releases it. Every failure
//! path after resolution therefore releases the artifact on return.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use dcf_core::{Mode, PluginError, TransportError};

use crate::loopback::LoopbackTransport;
use crate::transport::Transport;

/// Capability version the loader accepts.
pub const EXPECTED_PLUGIN_VERSION: &str = "1.0";
/// Factory entry point name.
pub const FACTORY_SYMBOL: &str = "create_plugin";
/// Version accessor entry point name.
pub const VERSION_SYMBOL: &str = "get_plugin_version";

/// Zero-argument factory; `None` means the plugin could not build a transport.
pub type TransportFactory = Arc<dyn Fn() -> Option<Box<dyn Transport>> + Send + Sync>;
/// Zero-argument version accessor.
pub type VersionAccessor = Arc<dyn Fn() -> String + Send + Sync>;

/// An entry point exported by an artifact.
#[derive(Clone)]
pub enum EntryPoint {
    Factory(TransportFactory),
    Version(VersionAccessor),
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPoint::Factory(_) => f.write_str("EntryPoint::Factory"),
            EntryPoint::Version(_) => f.write_str("EntryPoint::Version"),
        }
    }
}

/// A resolved plugin artifact. Dropping it releases the artifact.
pub trait Artifact: Send + Sync {
    /// Name the artifact was resolved under.
    fn name(&self) -> &str;

    /// Look up an exported entry point by symbol name.
    fn entry_point(&self, symbol: &str) -> Option<EntryPoint>;
}

/// Resolves artifact paths to acquired artifacts.
pub trait ArtifactResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Result<Box<dyn Artifact>, PluginError>;
}

/// Normalize an artifact path to its registry key.
///
/// `plugins/libloopback.so`, `libloopback` and `loopback` all map to
/// `loopback`.
pub fn artifact_key(path: &str) -> String {
    let stem = Path::new(path.trim())
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.strip_prefix("lib").unwrap_or(stem).to_ascii_lowercase()
}

/// Statically linked artifact registered by name.
#[derive(Clone)]
pub struct StaticArtifact {
    name: String,
    factory: Option<TransportFactory>,
    version: Option<VersionAccessor>,
}

impl StaticArtifact {
    /// Artifact exporting both entry points.
    pub fn new<F>(name: impl Into<String>, version: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Option<Box<dyn Transport>> + Send + Sync + 'static,
    {
        let version = version.into();
        Self {
            name: name.into(),
            factory: Some(Arc::new(factory)),
            version: Some(Arc::new(move || version.clone())),
        }
    }

    /// Artifact exporting only the entry points given.
    pub fn from_parts(
        name: impl Into<String>,
        factory: Option<TransportFactory>,
        version: Option<VersionAccessor>,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for StaticArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticArtifact")
            .field("name", &self.name)
            .field("factory", &self.factory.is_some())
            .field("version", &self.version.is_some())
            .finish()
    }
}

struct RegisteredArtifact {
    inner: StaticArtifact,
}

impl Artifact for RegisteredArtifact {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn entry_point(&self, symbol: &str) -> Option<EntryPoint> {
        match symbol {
            FACTORY_SYMBOL => self.inner.factory.clone().map(EntryPoint::Factory),
            VERSION_SYMBOL => self.inner.version.clone().map(EntryPoint::Version),
            _ => None,
        }
    }
}

impl Drop for RegisteredArtifact {
    fn drop(&mut self) {
        tracing::debug!(artifact = %self.inner.name, "plugin artifact released");
    }
}

/// Registry of statically linked artifacts keyed by [`artifact_key`].
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    artifacts: HashMap<String, StaticArtifact>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `loopback` artifact.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(StaticArtifact::new(
            "loopback",
            EXPECTED_PLUGIN_VERSION,
            || Some(Box::new(LoopbackTransport::new()) as Box<dyn Transport>),
        ));
        registry
    }

    /// Register an artifact, replacing any previous one under the same key.
    pub fn register(&mut self, artifact: StaticArtifact) {
        self.artifacts.insert(artifact_key(&artifact.name), artifact);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.artifacts.contains_key(&artifact_key(path))
    }

    /// Registered artifact names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.artifacts.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ArtifactResolver for PluginRegistry {
    fn resolve(&self, path: &str) -> Result<Box<dyn Artifact>, PluginError> {
        let key = artifact_key(path);
        let artifact = self
            .artifacts
            .get(&key)
            .ok_or_else(|| PluginError::NotFound(path.to_string()))?;
        tracing::debug!(artifact = %key, "plugin artifact acquired");
        Ok(Box::new(RegisteredArtifact {
            inner: artifact.clone(),
        }))
    }
}

/// Transport produced by a plugin, holding its artifact alive.
///
/// Fields drop in declaration order, so the transport is gone before the
/// artifact is released.
pub struct PluginTransport {
    inner: Box<dyn Transport>,
    _artifact: Box<dyn Artifact>,
}

#[async_trait]
impl Transport for PluginTransport {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn setup(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.inner.setup(host, port).await
    }

    async fn activate(&mut self, mode: Mode) -> Result<(), TransportError> {
        self.inner.activate(mode).await
    }

    async fn deactivate(&mut self) -> Result<(), TransportError> {
        self.inner.deactivate().await
    }

    async fn send(&mut self, frame: &[u8], target: &str) -> Result<(), TransportError> {
        self.inner.send(frame, target).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        self.inner.receive().await
    }

    async fn request(&mut self, frame: &[u8], target: &str) -> Result<Vec<u8>, TransportError> {
        self.inner.request(frame, target).await
    }

    async fn teardown(&mut self) {
        self.inner.teardown().await
    }
}

/// Loads transports from plugin artifacts.
#[derive(Clone)]
pub struct PluginLoader {
    resolver: Arc<dyn ArtifactResolver>,
    expected_version: String,
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("expected_version", &self.expected_version)
            .finish_non_exhaustive()
    }
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new(Arc::new(PluginRegistry::with_builtins()))
    }
}

impl PluginLoader {
    /// Loader pinned to [`EXPECTED_PLUGIN_VERSION`].
    pub fn new(resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self {
            resolver,
            expected_version: EXPECTED_PLUGIN_VERSION.to_string(),
        }
    }

    pub fn expected_version(&self) -> &str {
        &self.expected_version
    }

    /// Resolve `path`, verify its version and build its transport.
    pub fn load(&self, path: &str) -> Result<Box<dyn Transport>, PluginError> {
        let artifact = self.resolver.resolve(path)?;

        let factory = match artifact.entry_point(FACTORY_SYMBOL) {
            Some(EntryPoint::Factory(factory)) => factory,
            _ => {
                return Err(PluginError::MissingEntryPoint {
                    artifact: path.to_string(),
                    symbol: FACTORY_SYMBOL,
                })
            }
        };
        let version = match artifact.entry_point(VERSION_SYMBOL) {
            Some(EntryPoint::Version(version)) => version,
            _ => {
                return Err(PluginError::MissingEntryPoint {
                    artifact: path.to_string(),
                    symbol: VERSION_SYMBOL,
                })
            }
        };

        let found = version();
        if found != self.expected_version {
            return Err(PluginError::VersionMismatch {
                expected: self.expected_version.clone(),
                found,
            });
        }

        let inner = factory().ok_or_else(|| PluginError::FactoryFailed(path.to_string()))?;
        tracing::info!(artifact = %artifact.name(), transport = %inner.name(), "transport plugin loaded");

        Ok(Box::new(PluginTransport {
            inner,
            _artifact: artifact,
        }))
    }
}
