pub mod classify;
pub mod policy;
pub mod reconcile;
pub mod recover;
pub mod status;
