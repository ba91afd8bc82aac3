pub mod credentials;
pub mod scheduler;
pub mod services;
