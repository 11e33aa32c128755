pub mod polling_service;
pub mod window;
