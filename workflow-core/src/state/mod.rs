mod service;

pub use service::StateServices;
