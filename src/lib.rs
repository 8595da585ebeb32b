//! regatta: the instantiation and scheduling core of a regression-test
//! framework for large computing clusters.
//!
//! The crate turns declaratively defined test definitions (with variant
//! spaces, optional fixtures and lifecycle hooks) into a concrete,
//! ordered, deduplicated list of runnable cases, wires their dependency
//! edges, and decides which lifecycle hooks fire around each pipeline
//! stage. The pipeline stage bodies themselves, the scheduler backends
//! and the CLI live outside this crate; the core only queries the
//! [`runtime::Runtime`] collaborator for the current system's topology.

pub mod case;
pub mod error;
pub mod fixture;
pub mod graph;
pub mod hooks;
pub mod registry;
pub mod runtime;
pub mod version;

pub use case::{
    BuildContext, DefRef, DepKind, DepResolver, NoDependencies, ResetSysEnv, TestCase, TestDef,
    instantiate,
};
pub use error::CoreError;
pub use fixture::registry::FixtureRegistry;
pub use fixture::space::FixtureSpace;
pub use fixture::{Scope, TestFixture};
pub use graph::DependencyGraph;
pub use hooks::{AttachPoint, Hook, HookDecl, HookRegistry, Stage, When, run_stage};
pub use registry::TestRegistry;
pub use runtime::{Environment, Partition, Runtime, System};
pub use version::{Version, VersionValidator};
