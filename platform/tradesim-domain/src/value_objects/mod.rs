pub mod bar;
pub mod equity_point;
pub mod exit_reason;
pub mod side;
pub mod signal;
