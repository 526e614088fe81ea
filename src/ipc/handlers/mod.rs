pub mod activities;
pub mod connectivity;
pub mod core;
pub mod queue;
pub mod settings;
