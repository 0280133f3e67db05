//! Entra ID sign-in and token lifecycle for Business Central.
//!
//! [`entra`] builds the authorize URL and token-endpoint forms, [`pkce`]
//! generates the verifier/challenge pair, [`callback`] receives the redirect,
//! and [`TokenStore`] ties them together behind the `TokenProvider` trait.

pub mod callback;
pub mod entra;
pub mod pkce;
pub mod token_store;

pub use callback::{LoopbackCodeSource, PastedRedirectSource, is_loopback_redirect};
pub use entra::EntraEndpoints;
pub use token_store::TokenStore;
