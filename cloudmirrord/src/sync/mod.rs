pub mod adapter;
pub mod directories;
pub mod engine;
pub mod partition;
pub mod reconcile;
pub mod scope;
