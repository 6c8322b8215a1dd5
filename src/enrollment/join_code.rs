//! Join-code generation.

use rand::Rng;

const CODE_LENGTH: usize = 8;
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random uppercase alphanumeric token gating invite-only enrollment.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Admission comparison: trimmed, case-folded to uppercase, exact match.
pub fn matches(configured: &str, supplied: &str) -> bool {
    supplied.trim().to_uppercase() == configured
}
