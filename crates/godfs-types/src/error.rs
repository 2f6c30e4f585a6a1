//! Errors from parsing and decoding shared types.

use snafu::Snafu;

/// Errors from constructing or decoding shared types.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum TypeError {
    /// A file id does not have the `cc/dd/<md5>` shape.
    #[snafu(display("invalid file id '{value}': {reason}"))]
    InvalidFileId {
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An instance id is not 8 ASCII alphanumerics.
    #[snafu(display("invalid instance id '{value}'"))]
    InvalidInstanceId {
        /// The rejected value.
        value: String,
    },

    /// A server address could not be parsed.
    #[snafu(display("invalid server address '{value}'"))]
    InvalidServerAddr {
        /// The rejected value.
        value: String,
    },

    /// An encoded binlog record is malformed.
    #[snafu(display("corrupt binlog record: {reason}"))]
    CorruptRecord {
        /// What was wrong with the record.
        reason: String,
    },

    /// A role name is unknown.
    #[snafu(display("unknown role '{value}'"))]
    UnknownRole {
        /// The rejected value.
        value: String,
    },
}
