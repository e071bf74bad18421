pub mod savepoint;
pub mod settings;
