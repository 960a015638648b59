mod dto;
pub mod extractors;
pub mod services;

pub use dto::{Claims, JwtKeys, TokenKind};
pub use extractors::CurrentUser;
