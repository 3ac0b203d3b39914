pub mod cron;
pub mod document;
pub mod error;
pub mod health;
pub mod session;
