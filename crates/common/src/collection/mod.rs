//! Collections and their publish records
//!
//! - [`CollectionDescription`]: what the pipeline consumes
//! - [`Transaction`] / [`UriInfo`]: one publish attempt and its per-file state
//! - [`PublishedCollection`]: what is kept once a collection has been published
//! - [`CollectionEncryptor`] / [`ContentSource`]: access to the content itself

mod content;
mod descriptor;
mod encryptor;
mod published;
mod transaction;

pub use content::{
    digest, ContentError, ContentSource, DirectoryContentSource, HashingReader, SourceFile,
};
pub use descriptor::{CollectionDescription, CollectionType};
pub use encryptor::{CollectionEncryptor, EncryptorError};
pub use published::{PublishResult, PublishedCollection, VerifyCounters};
pub use transaction::{
    Action, Transaction, TransitionError, UriInfo, UriStatus, VerificationStatus,
    UNKNOWN_URI_STATUS,
};
