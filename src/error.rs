//! Contains the errors reported by [Group::get](crate::group::Group::get).
//!
//! Only two kinds of errors ever reach the caller of a group: an invalid (empty) key and a failed
//! loader. Problems when talking to a peer are handled within the group (they are logged and the
//! value is computed locally instead) and are therefore represented as plain **anyhow** errors
//! within the [peers](crate::peers) layer.
//!
//! Misusing the API (e.g. registering peers twice for a group) isn't reported as error at all,
//! as this is a wiring mistake which has to be fixed in the code. Such calls simply panic.
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Enumerates the errors which can occur when fetching a value from a group.
///
/// Errors are cloneable, as a single failed load is reported to every caller which was waiting
/// for it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An empty key was given.
    #[error("key is required")]
    EmptyKey,

    /// The loader of a group failed to compute the value for a key.
    #[error("Failed to load '{key}' in group '{group}': {message}")]
    Loader {
        /// Contains the name of the group.
        group: String,
        /// Contains the key being loaded.
        key: String,
        /// Contains the message reported by the loader.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use crate::Error;

    #[test]
    fn errors_render_their_context() {
        assert_eq!(Error::EmptyKey.to_string(), "key is required");
        assert_eq!(
            Error::Loader {
                group: "scores".to_owned(),
                key: "Kate".to_owned(),
                message: "Kate not exist".to_owned()
            }
            .to_string(),
            "Failed to load 'Kate' in group 'scores': Kate not exist"
        );
    }
}
