//! Dispatcher settings.

use crate::media::MediaRange;

const DEFAULT_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Settings fixed when the [`Dispatcher`](crate::Dispatcher) is built.
///
/// ```rust
/// use tenon::{Config, MediaRange};
///
/// let config = Config::new()
///     .max_body_size(64 * 1024)
///     .absent_content_type(MediaRange::octet_stream());
/// assert_eq!(config.body_limit(), 64 * 1024);
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    max_body_size: usize,
    absent_content_type: MediaRange,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_body_size: DEFAULT_MAX_BODY_SIZE, absent_content_type: MediaRange::any() }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest request body read for a body parameter. Defaults to 2 MiB.
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Media type assumed for consumes matching when a request has no
    /// `Content-Type`. Defaults to `*/*`, which satisfies any route.
    pub fn absent_content_type(mut self, media: MediaRange) -> Self {
        self.absent_content_type = media;
        self
    }

    pub fn body_limit(&self) -> usize {
        self.max_body_size
    }

    pub fn default_content_type(&self) -> &MediaRange {
        &self.absent_content_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.body_limit(), 2 * 1024 * 1024);
        assert_eq!(c.default_content_type(), &MediaRange::any());
    }
}
