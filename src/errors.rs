//! Stable, log-scrapeable error taxonomy shared by every component.

use thiserror::Error;

/// Which of this crate's subsystems raised the error, used to render the
/// `module` field of a [`CoordinatorError`]'s stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    NodeStore,
    Policy,
    Scheduler,
    GroupGenerator,
    Controller,
    Http,
    Config,
}

impl Module {
    fn code(self) -> &'static str {
        match self {
            Module::NodeStore => "01",
            Module::Policy => "02",
            Module::Scheduler => "03",
            Module::GroupGenerator => "04",
            Module::Controller => "05",
            Module::Http => "06",
            Module::Config => "07",
        }
    }
}

/// Sub-feature within a module, used to render the `feature` field of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Register,
    Remove,
    Update,
    RoundRobin,
    CacheAffinity,
    LoadBalance,
    Dispatch,
    Partition,
    Deploy,
    Discovery,
    Monitor,
    StatusFile,
    KubeClient,
    Generic,
}

impl Feature {
    fn code(self) -> &'static str {
        match self {
            Feature::Register => "01",
            Feature::Remove => "02",
            Feature::Update => "03",
            Feature::RoundRobin => "04",
            Feature::CacheAffinity => "05",
            Feature::LoadBalance => "06",
            Feature::Dispatch => "07",
            Feature::Partition => "08",
            Feature::Deploy => "09",
            Feature::Discovery => "0a",
            Feature::Monitor => "0b",
            Feature::StatusFile => "0c",
            Feature::KubeClient => "0d",
            Feature::Generic => "ff",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Warning,
    Error,
    Critical,
}

impl Severity {
    fn code(self) -> char {
        match self {
            Severity::Warning => 'W',
            Severity::Error => 'E',
            Severity::Critical => 'C',
        }
    }
}

/// The error taxonomy from the error-handling design: one kind per row, each
/// carrying the module/feature pair needed to render a stable `MIE03...` code.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid input: {message}")]
    InvalidInput { module: Module, feature: Feature, message: String },

    #[error("invalid parameter: {message}")]
    InvalidParameter { module: Module, feature: Feature, message: String },

    #[error("not found: {message}")]
    NotFound { module: Module, feature: Feature, message: String },

    #[error("no worker currently available")]
    Unavailable { module: Module, feature: Feature },

    #[error("downstream call failed: {message}")]
    CallError { module: Module, feature: Feature, message: String },

    #[error("operation already applied")]
    OperationRepeat { module: Module, feature: Feature },

    #[error("resource exhausted: {message}")]
    ResourceExhausted { module: Module, feature: Feature, message: String },

    #[error("unexpected failure: {message}")]
    Exception { module: Module, feature: Feature, message: String },

    #[error("kubernetes client error")]
    Kube {
        module: Module,
        feature: Feature,
        #[source]
        source: kube::Error,
    },

    #[error("http client error")]
    Http {
        module: Module,
        feature: Feature,
        #[source]
        source: reqwest::Error,
    },

    #[error("json error")]
    Json {
        module: Module,
        feature: Feature,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error")]
    Io {
        module: Module,
        feature: Feature,
        #[source]
        source: std::io::Error,
    },
}

impl CoordinatorError {
    fn parts(&self) -> (Severity, Module, Feature, &'static str) {
        use CoordinatorError::*;
        match self {
            InvalidInput { module, feature, .. } => (Severity::Error, *module, *feature, "01"),
            InvalidParameter { module, feature, .. } => (Severity::Error, *module, *feature, "02"),
            NotFound { module, feature, .. } => (Severity::Error, *module, *feature, "03"),
            Unavailable { module, feature } => (Severity::Warning, *module, *feature, "04"),
            CallError { module, feature, .. } => (Severity::Error, *module, *feature, "05"),
            OperationRepeat { module, feature } => (Severity::Warning, *module, *feature, "06"),
            ResourceExhausted { module, feature, .. } => {
                (Severity::Critical, *module, *feature, "07")
            }
            Exception { module, feature, .. } => (Severity::Critical, *module, *feature, "08"),
            Kube { module, feature, .. } => (Severity::Error, *module, *feature, "05"),
            Http { module, feature, .. } => (Severity::Error, *module, *feature, "05"),
            Json { module, feature, .. } => (Severity::Error, *module, *feature, "02"),
            Io { module, feature, .. } => (Severity::Error, *module, *feature, "05"),
        }
    }

    /// Renders this error's stable `MIE03<W|E|C><module:2hex><feature:2hex><type:2hex>` code.
    pub fn code(&self) -> String {
        let (severity, module, feature, kind) = self.parts();
        format!(
            "MIE03{}{}{}{}",
            severity.code(),
            module.code(),
            feature.code(),
            kind
        )
    }

    /// Whether this error kind should trigger a scheduler-level re-queue
    /// rather than surfacing to the submitter.
    pub fn is_retryable_in_scheduler(&self) -> bool {
        matches!(self, CoordinatorError::Unavailable { .. })
    }
}

impl From<kube::Error> for CoordinatorError {
    fn from(source: kube::Error) -> Self {
        CoordinatorError::Kube {
            module: Module::Controller,
            feature: Feature::KubeClient,
            source,
        }
    }
}

impl From<reqwest::Error> for CoordinatorError {
    fn from(source: reqwest::Error) -> Self {
        CoordinatorError::Http {
            module: Module::Controller,
            feature: Feature::KubeClient,
            source,
        }
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(source: serde_json::Error) -> Self {
        CoordinatorError::Json {
            module: Module::Controller,
            feature: Feature::Generic,
            source,
        }
    }
}

impl From<std::io::Error> for CoordinatorError {
    fn from(source: std::io::Error) -> Self {
        CoordinatorError::Io {
            module: Module::Controller,
            feature: Feature::StatusFile,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
