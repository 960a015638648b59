pub mod services;

pub use services::FilePart;
