use std::time::Duration;

/// Default lifetime of a registered entry (5 minutes)
pub const DEFAULT_EXPIRATION_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Configuration for the registry store
///
/// # Example
///
/// ```rust
/// use fleeting_core::RegistryConfig;
/// use std::time::Duration;
///
/// let config = RegistryConfig::default()
///     .with_expiration_window(Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long an entry stays live after registration (default: 5 minutes)
    pub expiration_window: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            expiration_window: DEFAULT_EXPIRATION_WINDOW,
        }
    }
}

impl RegistryConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expiration window
    ///
    /// Entries whose timestamp is at or before `now - window` are dropped the
    /// next time the store is read or written.
    ///
    /// # Example
    ///
    /// ```rust
    /// use fleeting_core::RegistryConfig;
    /// use std::time::Duration;
    ///
    /// // Entries live for ten minutes
    /// let config = RegistryConfig::default()
    ///     .with_expiration_window(Duration::from_secs(600));
    /// ```
    pub fn with_expiration_window(mut self, window: Duration) -> Self {
        self.expiration_window = window;
        self
    }

    /// Sets the expiration window in whole minutes
    pub fn with_expiration_minutes(self, minutes: u64) -> Self {
        self.with_expiration_window(Duration::from_secs(minutes.saturating_mul(60)))
    }

    /// The expiration window as a `chrono` duration, saturating on overflow
    pub(crate) fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.expiration_window).unwrap_or(chrono::Duration::MAX)
    }
}
