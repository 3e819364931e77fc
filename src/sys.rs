//! Host-facing plumbing: the traits a host implements, input events, and the
//! timing and cancellation primitives the overlay runs on.

pub mod event;
pub mod host;
pub mod interceptor;
pub mod scope;
pub mod timer;
