// ABOUTME: Challenge instance orchestration: providers, lifecycle runtimes and persistence
// ABOUTME: Provisions per-participant containers and guarantees they are torn down on time

pub mod challenge;
pub mod manager;
pub mod providers;
pub mod reconcile;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod sweeper;

pub use challenge::{
    ChallengeCatalog, ChallengeDescriptor, ChallengeError, ExposedPort, FlagKind,
    SqliteChallengeCatalog,
};
pub use manager::{InstanceManager, InstanceOwner, InstanceView, ManagerError};
pub use providers::{
    BackendStatus, DockerProvider, MemoryProvider, PortBinding, Provider as ContainerProvider,
    ProviderError,
};
pub use reconcile::{ReconcileOptions, ReconcileReport};
pub use registry::InstanceRegistry;
pub use runtime::{InstanceRuntime, Phase};
pub use storage::{Instance, InstanceFilter, InstanceStorage, InstanceStore, StorageError};
pub use sweeper::{ExpirySweeper, SweepReport};
