use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to resolve application paths: {0}")]
    Paths(#[from] rebundle_platform::AppPathsError),
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error(transparent)]
    Client(#[from] rebundle_core::FetchError),
    #[error("no bundle URL template configured (set \"bundles_url\" in {settings})")]
    MissingTemplate { settings: String },
    #[error("no app key given (pass --app-key or set \"app_key\" in {settings})")]
    MissingAppKey { settings: String },
    #[error(transparent)]
    Location(#[from] rebundle_core::LocationError),
}
