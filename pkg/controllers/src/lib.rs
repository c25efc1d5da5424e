//! Quota reconciliation: keeps each namespace's Hard Limit consistent with
//! its Quota Limit, driven by change notifications and a periodic resync.

pub mod feed;
pub mod quota;
pub mod reconcile;
