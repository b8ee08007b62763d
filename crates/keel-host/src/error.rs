//! Host-side error type.

use keel_abi::error::AbiError;
use keel_abi::status;

/// Anything that can go wrong between the host and a plugin.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to load plugin library: {0}")]
    Load(String),

    #[error("plugin is missing required symbol `{0}`")]
    MissingSymbol(&'static str),

    #[error("plugin standard version {found} is older than required {required}")]
    VersionTooOld {
        found: keel_abi::version::StandardVersion,
        required: keel_abi::version::StandardVersion,
    },

    /// A slot or export call came back with a nonzero status and no
    /// exception detail.
    #[error("plugin call failed with status {0}")]
    Status(i32),

    #[error("plugin does not implement the requested interface")]
    NoInterface,

    #[error("named export not found: `{0}`")]
    ExportNotFound(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("async wait timed out")]
    WaitTimeout,

    /// A fault decoded from the exception chain of a completed handle.
    #[error("plugin fault: {0}")]
    Fault(#[from] AbiError),
}

impl HostError {
    /// Map a nonzero status code to the matching variant.
    pub fn from_status(code: i32) -> Self {
        match code {
            status::CANCELLED => HostError::Cancelled,
            status::NO_INTERFACE => HostError::NoInterface,
            _ => HostError::Status(code),
        }
    }
}

/// Turn a slot return code into `Ok(())` or the mapped error.
pub fn check(code: i32) -> Result<(), HostError> {
    if status::is_ok(code) {
        Ok(())
    } else {
        Err(HostError::from_status(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_variants() {
        assert!(check(status::OK).is_ok());
        assert!(matches!(check(status::CANCELLED), Err(HostError::Cancelled)));
        assert!(matches!(check(status::NO_INTERFACE), Err(HostError::NoInterface)));
        assert!(matches!(check(status::FAIL), Err(HostError::Status(_))));
    }
}
