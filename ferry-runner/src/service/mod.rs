//! Service layer
//!
//! Services contain the release pipeline logic. Each stage of a run
//! (build, tag, publish, render, watch) lives in its own module; external
//! collaborators are reached through traits so they can be replaced by
//! fakes in tests.

pub mod builder;
pub mod publisher;
pub mod release;
pub mod render;
pub mod tags;
pub mod watcher;

// Re-export traits
pub use builder::BuildBackend;
pub use publisher::Registry;
pub use release::RunObserver;
pub use watcher::ClusterApi;

// Re-export implementations
pub use builder::ImageBuilder;
pub use publisher::{PublishReport, PublishSettings, Publisher, RegistryCredentials};
pub use release::{NoopObserver, ReleaseRequest, ReleaseRunner, RunReport};
pub use render::{ManifestRenderer, RenderedManifest, TemplateSet};
pub use tags::TagPlanner;
pub use watcher::{CancelToken, DeploymentHealth, RolloutWatcher, WatchSettings};
