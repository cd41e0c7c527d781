pub mod health;
pub mod restart;
pub mod service;
