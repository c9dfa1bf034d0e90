use rand::{Rng, distr::Alphanumeric, rng};

/// A source of candidate nonces.
///
/// Candidates only need to be unlikely to collide with the nonces of requests
/// that are still in flight; the registry re-samples on collision. This
/// abstraction allows you to plug in a scripted source in tests.
///
/// # Example
/// ```
/// use chunkwise::NonceSource;
///
/// struct Fixed;
/// impl NonceSource for Fixed {
///     fn sample(&self) -> String {
///         "nonce".to_string()
///     }
/// }
///
/// assert_eq!(Fixed.sample(), "nonce");
/// ```
pub trait NonceSource: Send + Sync {
    /// Returns a candidate nonce.
    fn sample(&self) -> String;
}

/// A `NonceSource` drawing alphanumeric characters from the thread-local RNG.
///
/// This type does **not** store the RNG itself; it accesses the thread-local
/// generator on each call, so it may be shared freely across threads.
///
/// With the default length of 32 there are 62^32 candidates, so a re-sample is
/// practically never needed.
#[derive(Clone, Debug)]
pub struct ThreadNonce {
    len: usize,
}

impl ThreadNonce {
    pub const fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Default for ThreadNonce {
    fn default() -> Self {
        Self::new(crate::DEFAULT_NONCE_LEN)
    }
}

impl NonceSource for ThreadNonce {
    fn sample(&self) -> String {
        rng()
            .sample_iter(Alphanumeric)
            .take(self.len)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn samples_have_requested_length_and_alphabet() {
        let source = ThreadNonce::new(16);
        let nonce = source.sample();
        assert_eq!(nonce.len(), 16);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn samples_do_not_repeat() {
        let source = ThreadNonce::default();
        let seen: HashSet<_> = (0..4096).map(|_| source.sample()).collect();
        assert_eq!(seen.len(), 4096);
    }
}
