mod host;
mod paths;

pub use host::host_platform;
pub use paths::{AppPaths, AppPathsError};
