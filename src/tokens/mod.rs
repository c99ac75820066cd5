pub mod api_token;
pub mod codec;
pub mod generator;
pub mod rotation;
pub mod store;
pub mod workspace;

pub use codec::{Claims, Codec, CodecError, TokenUse, WorkspaceClaims};
pub use generator::{generate_hex, generate_identifier, hash_secret};
pub use rotation::{AuthError, CookieAuth, RotationEngine};
