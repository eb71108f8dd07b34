pub mod resolution;
pub mod restart_policy;
