//! Core types and traits for the bcconnect workspace.
//!
//! This crate defines the shared abstractions used across all layers of the
//! Business Central connector: the error taxonomy, the OAuth token record,
//! the tenant context, the OData collection envelope, and the async traits
//! that stand in for every external collaborator (secure storage, HTTP,
//! interactive sign-in, time).

pub mod clock;
pub mod envelope;
pub mod error;
pub mod tenant;
pub mod token;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::Envelope;
pub use error::{ApiError, ServiceError};
pub use tenant::{DEFAULT_API_BASE, DEFAULT_AUTH_BASE, TenantContext};
pub use token::{Token, TokenState};
pub use traits::{
    AuthorizationCodeSource, CallbackParams, HttpMethod, HttpRequest, HttpResponse,
    HttpTransport, SecureStore, TokenProvider,
};
