pub mod badge;
pub mod persistence;
