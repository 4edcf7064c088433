//! Configuration for endpoints and the forwarder.

use msglog_protocol::Priority;
use std::time::Duration;

/// Pending frames an endpoint buffers before dropping new ones.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Delay before write interest is registered for frames queued off the
/// owning thread.
pub const DEFAULT_REGISTER_WRITE_DELAY: Duration = Duration::from_millis(500);

/// Consecutive failed connects after which an endpoint gives up.
pub const DEFAULT_MAX_RECONNECTS: u32 = 3;

/// Configuration for a single collector endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Maximum number of pending frames.
    pub queue_capacity: usize,
    /// Delay of the register-write timer.
    pub register_write_delay: Duration,
    /// Consecutive failed connection attempts before permanent failure.
    pub max_reconnects: u32,
    /// How long a connect may stay in progress before it counts as failed.
    pub connect_timeout: Duration,
}

impl EndpointConfig {
    /// Sets the pending queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets the register-write timer delay.
    pub fn with_register_write_delay(mut self, delay: Duration) -> Self {
        self.register_write_delay = delay;
        self
    }

    /// Sets the reconnect limit.
    pub fn with_max_reconnects(mut self, max: u32) -> Self {
        self.max_reconnects = max;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            register_write_delay: DEFAULT_REGISTER_WRITE_DELAY,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for a [`crate::Forwarder`].
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Component name sent in the registration frame, e.g. `cellapp`.
    pub component_name: String,
    /// Logger group identifier.
    pub logger_id: String,
    /// OS user id reported to collectors.
    pub uid: u16,
    /// Process id reported to collectors.
    pub pid: u32,
    /// Whether messages are forwarded at all.
    pub enabled: bool,
    /// Messages below this priority are not forwarded.
    pub filter_threshold: Priority,
    /// Whether spam suppression is active.
    pub filter_spam: bool,
    /// Whether suppressed messages are summarised once per second.
    pub summarise_spam: bool,
    /// Calls per second allowed for a suppressible format string.
    pub spam_threshold: u32,
    /// Format string prefixes that may be suppressed. An empty pattern
    /// matches every format string.
    pub suppression_patterns: Vec<String>,
    /// Endpoint settings.
    pub endpoint: EndpointConfig,
}

impl ForwarderConfig {
    /// Creates a configuration for the current process.
    pub fn new(component_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            logger_id: String::new(),
            uid: 0,
            pid: std::process::id(),
            enabled: true,
            filter_threshold: Priority::Trace,
            filter_spam: true,
            summarise_spam: true,
            spam_threshold: 20,
            suppression_patterns: Vec::new(),
            endpoint: EndpointConfig::default(),
        }
    }

    /// Sets the logger id.
    pub fn with_logger_id(mut self, logger_id: impl Into<String>) -> Self {
        self.logger_id = logger_id.into();
        self
    }

    /// Sets the reported OS user id.
    pub fn with_uid(mut self, uid: u16) -> Self {
        self.uid = uid;
        self
    }

    /// Sets the reported process id.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Enables or disables forwarding.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the minimum forwarded priority.
    pub fn with_filter_threshold(mut self, priority: Priority) -> Self {
        self.filter_threshold = priority;
        self
    }

    /// Sets the spam threshold.
    pub fn with_spam_threshold(mut self, threshold: u32) -> Self {
        self.spam_threshold = threshold;
        self
    }

    /// Enables or disables spam suppression.
    pub fn with_filter_spam(mut self, filter: bool) -> Self {
        self.filter_spam = filter;
        self
    }

    /// Enables or disables spam summaries.
    pub fn with_summarise_spam(mut self, summarise: bool) -> Self {
        self.summarise_spam = summarise;
        self
    }

    /// Adds a suppression prefix.
    pub fn with_suppression_pattern(mut self, prefix: impl Into<String>) -> Self {
        self.suppression_patterns.push(prefix.into());
        self
    }

    /// Sets the endpoint configuration.
    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self::new("")
    }
}
