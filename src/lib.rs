//! kata-operator: Kubernetes operator for the Kata Containers runtime
//!
//! This crate provides an operator that installs the Kata runtime on a pool
//! of OpenShift nodes, wires it into CRI-O through the Machine Config
//! Operator, publishes a RuntimeClass, and reverses all of it when the
//! KataConfig is deleted.

pub mod controller;
pub mod crd;
pub mod error;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
