/**
 * Cryptographic types and operations.
 *  - Collection keys and the stream cipher
 *  - Key wrapping for handoff to the publishing agent
 */
pub mod crypto;
/**
 * Collection key lookup, with the legacy to central
 *  keyring migration in front of both backends.
 */
pub mod keyring;
/**
 * Collection descriptors, publish transactions and
 *  published collection records, plus encrypted
 *  access to collection content.
 */
pub mod collection;

pub mod prelude {
    pub use crate::collection::{
        CollectionDescription, CollectionEncryptor, ContentSource, PublishResult,
        PublishedCollection, Transaction, UriInfo, UriStatus, VerificationStatus,
    };
    pub use crate::crypto::{CollectionKey, Secret, WrappedKey};
    pub use crate::keyring::{KeyringCache, KeyringError, MigrationCache};
}
