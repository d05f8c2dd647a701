//! tk-farm Deployment Engine
//!
//! This crate turns a synthesized [`Template`](tk_farm_stack::Template) into
//! provisioned resources and keeps track of what it provisioned.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - plan(template, previous) → Plan                          │
//! │  - apply(template, previous, cancel) → ApplyReport          │
//! │  - destroy(deployment, cancel) → DestroyReport              │
//! │  - batch scheduling, intrinsic resolution, rollback         │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     dyn Provider                            │
//! │  - create / update / delete with resolved properties        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! State is a [`Deployment`], persisted through a [`StateStore`]. Progress is
//! reported as [`DeploymentEvent`]s to a [`DeploymentNotifier`].
//!
//! # Usage
//!
//! ```ignore
//! use tk_farm_engine::{Engine, FsStateStore, StateStore};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = Engine::new(provider);
//! let store = FsStateStore::new(state_dir);
//!
//! let previous = store.load("tk-farm-frontend").await?;
//! let report = engine
//!   .apply("tk-farm-frontend", &template, previous.as_ref(), CancellationToken::new())
//!   .await?;
//! store.save(&report.deployment).await?;
//! ```

mod engine;
mod error;
mod events;
mod plan;
mod provider;
mod resolve;
mod state;
mod store;

pub use engine::{AppliedChange, ApplyReport, DestroyReport, Engine};
pub use error::{ApplyError, ProviderError};
pub use events::{ChannelNotifier, DeploymentEvent, DeploymentNotifier, NoopNotifier};
pub use plan::{Action, Plan, PlannedChange, plan};
pub use provider::{ProvisionedResource, Provider, ResourceRequest};
pub use resolve::{property_at, resolve};
pub use state::{DeployedResource, Deployment};
pub use store::{FsStateStore, MemoryStateStore, StateStore, StoreError};
