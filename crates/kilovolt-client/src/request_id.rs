//! Request id generation
//!
//! Ids are 16 characters drawn from a 50-letter alphabet. Each random byte
//! is reduced modulo the alphabet size, so no byte is ever rejected and
//! every id embeds in a JSON string without escaping.

use rand::rngs::OsRng;
use rand::RngCore;

/// Length of a generated request id
pub const REQUEST_ID_LEN: usize = 16;

const ALPHABET: &[u8; 50] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwx";

/// Generates single-use request ids from the OS entropy source
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdGenerator;

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Produce a fresh id
    pub fn generate(&self) -> String {
        let mut bytes = [0u8; REQUEST_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        bytes.iter().map(|b| map_byte(*b)).collect()
    }

    /// Whether `c` can appear in a generated id
    pub fn is_legal_char(c: char) -> bool {
        c.is_ascii() && ALPHABET.contains(&(c as u8))
    }
}

fn map_byte(b: u8) -> char {
    ALPHABET[(b as usize) % ALPHABET.len()] as char
}
