//! Transition factories: load, access, submit, and action.

pub const REQUIRED_LOAD: &[&str] = &["effects"];
pub const REQUIRED_ACCESS: &[&str] = &[];
pub const REQUIRED_SUBMIT: &[&str] = &["validate"];
pub const REQUIRED_ACTION: &[&str] = &[];
