//! The registry holds the providers available to the process and resolves the
//! model a request runs against.
//!
//! Providers are registered once at start-up (see [`populate`]). After that the
//! registry is shared read-only between requests; the only state it mutates is
//! a write-once cache of the model lists fetched from provider listing
//! endpoints.
//!
//! Resolution of a request consists of two parts, the provider and the model.
//! The provider is named by the request (or the configured default). The model
//! is looked up among the provider's statically declared models first, which
//! costs nothing, and only then among the models the provider serves right now.
//! A model nobody serves is substituted with the first available one, unless
//! the configuration asks for such requests to be rejected.

pub(crate) mod credentials;
pub(crate) mod populate;
pub(crate) mod registry;
pub(crate) mod resolver;

pub(crate) use registry::Registry;
