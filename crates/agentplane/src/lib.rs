//! Declarative agent control plane: compiles Agent resources into runnable
//! workloads, keeps them converged, and serves them over A2A.

pub mod a2a;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod reconciler;
pub mod resources;
pub mod store;
pub mod translator;

#[cfg(test)]
mod testing;
