use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KlusterError {
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("failed to query k3s releases: {message}")]
    #[diagnostic(help("re-run the command once the releases endpoint is reachable"))]
    RemoteFetch { message: String, body: String },

    #[error("failed to decode k3s releases: {message}")]
    ReleaseDecode { message: String },

    #[error("failed to initialise release cache at {path}")]
    CacheInit {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse kubeconfig {path}: {message}")]
    #[diagnostic(help("the file was left untouched; fix or move it and retry"))]
    ParseFailed { path: String, message: String },

    #[error("failed to serialize {what}: {message}")]
    Serialize { what: String, message: String },

    #[error("kluster \"{name}\" has no IP address")]
    MissingClusterAddress { name: String },

    #[error("kluster \"{name}\" does not exist")]
    ClusterNotFound { name: String },

    #[error("{command} failed: {message}")]
    Hypervisor { command: String, message: String },

    #[error("failed to decode {command} output: {message}")]
    RegistryDecode { command: String, message: String },
}
