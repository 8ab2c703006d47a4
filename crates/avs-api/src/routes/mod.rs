//! Route modules. Each exposes a `router()` merged by [`crate::app`].

pub mod admin;
pub mod sessions;
