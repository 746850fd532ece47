pub mod password;
pub mod reserved;
pub mod service;

pub use password::ProofIssuer;
pub use reserved::ReservedPaths;
pub use service::{is_valid_shortcode, LinkService, PasswordProof};
