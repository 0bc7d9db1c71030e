use rand::distributions::{Alphanumeric, DistString};
use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Length of authenticity tokens issued with new sessions.
pub const TOKEN_LENGTH: usize = 32;

/// A type with the ability to generate random tokens.
///
/// Generators are shared by all concurrently running requests.
pub trait TokenGenerator: Send + Sync {
    /// Generate a token, i.e. a string of `TOKEN_LENGTH` alphanumeric characters.
    fn generate_token(&self) -> String;
}

/// The default token generator with focus on security.
/// It uses [rand::thread_rng] as a random source and the [Alphanumeric] distribution to generate token strings.
/// This gives `log_2(26+26+10) ≥ 5.95` bits of entropy per character.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTokenGenerator<const LENGTH: usize = TOKEN_LENGTH>;

impl<const LENGTH: usize> TokenGenerator for DefaultTokenGenerator<LENGTH> {
    fn generate_token(&self) -> String {
        let mut token = String::with_capacity(LENGTH);
        Alphanumeric.append_string(&mut rand::thread_rng(), &mut token, LENGTH);
        token
    }
}

/// A debug token generator that generates an ascending sequence of integers, formatted as strings padded with zeroes.
#[derive(Debug, Default)]
pub struct DebugTokenGenerator<const LENGTH: usize = TOKEN_LENGTH> {
    next_index: AtomicUsize,
}

impl<const LENGTH: usize> TokenGenerator for DebugTokenGenerator<LENGTH> {
    fn generate_token(&self) -> String {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let mut token = String::with_capacity(LENGTH);
        // Writing into a String cannot fail.
        let _ = write!(&mut token, "{:0width$}", index, width = LENGTH);
        token
    }
}
