//! Core library for user accounts: identity provider clients, the profile
//! store, payload validation, and the coordinator for cross-system writes.

pub mod coordinator;
mod error;
pub mod identity;
pub mod profile;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use coordinator::{AccountCoordinator, Incident, IncidentSink, LogIncidentSink, Operation};
pub use error::{
    CoreError, FieldIssue, IntegrityFault, ProviderError, Result, StoreError, ValidationFailure,
};
pub use identity::{
    Account, AccountMetadata, AccountPage, AccountSeed, AccountUpdate, CustomClaims, FirebaseAuth,
    IdentityProvider, MemoryIdentityProvider, SeedFile, ServiceAccountKey, VerifiedToken,
};
pub use profile::{Gender, Profile, ProfilePatch, ProfileStore, ProfileTx, SqlProfileStore};
