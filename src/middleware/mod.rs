mod admin_auth;

pub use admin_auth::{ADMIN_KEY_HEADER, admin_auth};
