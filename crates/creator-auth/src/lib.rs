//! Creator credential storage and partner token endpoints
//!
//! Holds everything the token lifecycle needs below the decision layer:
//! the credential record model and store adapters, access-token expiry
//! decoding, and the authorization endpoint clients. This crate makes no
//! refresh decisions of its own.
//!
//! Credential flow:
//! 1. An operator captures tokens out of band and writes them through a
//!    `CredentialStore` (file or Airtable)
//! 2. `jwt::is_expiring()` decides whether the stored access token is still usable
//! 3. `token::TokenEndpoint::refresh()` rotates the pair when it isn't
//! 4. The new pair is written back with `CredentialStore::update()`

pub mod airtable;
pub mod client_credentials;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod jwt;
pub mod token;

pub use airtable::AirtableStore;
pub use client_credentials::ClientCredentialsCache;
pub use constants::*;
pub use credentials::{
    BoxFuture, CredentialRecord, CredentialStore, CredentialUpdate, FileCredentialStore,
    NewCredential, TokenStatus,
};
pub use error::{Error, Result};
pub use jwt::{decode_exp, is_expiring};
pub use token::{HttpTokenEndpoint, TokenEndpoint, TokenResponse};
