//! Request-scoped identity types shared between the gateway binary and the
//! dispatch core. Authentication/authorization of the caller itself is an
//! external concern; this crate only carries what the core needs once a
//! caller has already been identified.

mod client_identity;

pub use client_identity::OrganizationContext;
