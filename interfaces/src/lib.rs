//! Interface abstractions for the core's three external collaborators
//! (`spec.md` §9): a document store (Firestore-shaped, compare-and-set),
//! an object store (blob storage for score/audio/voicebank bytes), and an
//! identity verifier (auth, out of scope per `spec.md` §1 Non-goals beyond
//! "assumed to yield a stable user id").
//!
//! Each trait is minimal and synchronous in spirit (one async method per
//! concern) so the core is testable without network, matching the
//! teacher's pattern of trait-bounded storage backends
//! (`data-connector::ConversationStorage`).

pub mod document_store;
pub mod identity;
pub mod object_store;

pub use document_store::{CasError, DocumentStore, InMemoryDocumentStore};
pub use identity::{AlwaysAllowIdentity, IdentityVerifier, VerifiedIdentity};
pub use object_store::{InMemoryObjectStore, ObjectStore, ObjectStoreError};
