mod canonical_json;
mod token;

pub use canonical_json::{canonical_json, content_hash};
pub use token::{hash_token, mint_token};
