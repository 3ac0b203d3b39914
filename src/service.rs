pub mod debounce;
pub mod document;
pub mod export;
pub mod identity;
pub mod session;
