//! Business Central REST access.
//!
//! [`RestClient`] resolves endpoints against the tenant's API root, attaches
//! a bearer token from any `TokenProvider`, maps status codes onto `ApiError`
//! and follows OData paging. [`ReqwestTransport`] is the production
//! `HttpTransport`.

pub mod odata;
pub mod records;
pub mod rest;
pub mod transport;

pub use odata::ODataQuery;
pub use records::{BcEnvironment, Company, Customer, Item, Record, SalesOrder, Vendor};
pub use rest::RestClient;
pub use transport::ReqwestTransport;
