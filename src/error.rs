use thiserror::Error;

/// Failures of the initial port lookup.
///
/// These are the only errors the enrichment pipeline lets reach the user, so
/// `main` matches on them to pick a friendlier message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no service found on this port")]
    NoServiceFound,

    #[error("could not convert process id {0:?} to an integer")]
    MalformedPid(String),
}

impl LookupError {
    /// True when the error chain bottoms out in [`LookupError::NoServiceFound`]
    pub fn is_no_service(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<LookupError>(),
                Some(LookupError::NoServiceFound)
            )
        })
    }
}
