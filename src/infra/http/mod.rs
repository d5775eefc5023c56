//! HTTP call invokers.

pub mod graph;

pub use graph::GraphInvoker;
