pub mod observability;
pub mod state;
