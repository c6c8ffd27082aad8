use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[from] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("Invalid configuration in CommonService {tenant}: {message}")]
    InvalidTenantConfig { tenant: String, message: String },

    #[error("Invalid built-in table {table}: {message}")]
    InvalidStaticTable { table: String, message: String },

    #[error("The scope mapping ConfigMap {0} is malformed: {1}")]
    InvalidScopeMapping(String, String),

    #[error("The licensing backup {0} is malformed: {1}")]
    InvalidBackup(String, String),

    #[error("The CommonService {0} does not exist")]
    CommonServiceNotFound(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::YamlError(_) => "YamlError",
            Error::KubeError(_) => "KubeError",
            Error::FinalizerError(_) => "FinalizerError",
            Error::InvalidTenantConfig { .. } => "InvalidTenantConfig",
            Error::InvalidStaticTable { .. } => "InvalidStaticTable",
            Error::InvalidScopeMapping(_, _) => "InvalidScopeMapping",
            Error::InvalidBackup(_, _) => "InvalidBackup",
            Error::CommonServiceNotFound(_) => "CommonServiceNotFound",
        }
    }
}

pub mod controllers;

/// Configuration merge and tenant aggregation
pub mod engine;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use controllers::{Settings, State};
pub use metrics::Metrics;

/// CRDs read and written by the operator
pub mod resources;
