// ABOUTME: Sandbox runtime for running untrusted scripts in isolated, resource-limited containers
// ABOUTME: Provider contract, Docker backend, explicit retry policy and deadline-bound runs

pub mod providers;
pub mod retry;
pub mod runtime;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use providers::{
    CapturedOutput, ContainerSpec, DockerProvider, ManagedContainer, Provider, ProviderError,
    ResourceLimits,
};
pub use retry::{Classifier, RetryError, RetryPolicy};
pub use runtime::{
    ContainerHandle, Result, RunEnv, RunOutcome, RunRequest, RunResult, SandboxError,
    SandboxHealth, SandboxRuntime, AGENT_LABEL, KIND_LABEL, MANAGED_LABEL, RUN_LABEL,
};
