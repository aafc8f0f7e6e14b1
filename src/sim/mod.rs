//! Host-side collaborators for running the firmware without hardware.

pub mod link;
pub mod platform;
pub mod sensors;
