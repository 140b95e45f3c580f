//! Installation profile loading and validation

pub mod profile;

pub use profile::Profile;
