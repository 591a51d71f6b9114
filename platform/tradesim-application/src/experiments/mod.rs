pub mod sweep;
pub mod walk_forward;
