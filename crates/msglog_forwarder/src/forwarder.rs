//! The per-process forwarder: fans log calls out to every known collector.

use crate::config::ForwarderConfig;
use crate::discovery::{CollectorDirectory, CollectorInfo};
use crate::endpoint::{EndpointState, EndpointStatus, LoggerEndpoint, RemovalReason};
use crate::error::{ForwarderError, ForwarderResult};
use crate::socket::{NetSocketFactory, SocketFactory};
use crate::suppression::{FormatHandler, SuppressionPatterns};
use bytes::Bytes;
use msglog_format::{Arg, FormatString};
use msglog_protocol::{
    AppIdAssignment, ComponentRegistration, LogMessage, LoggerMessage, MessageSource, Metadata,
    Priority, ProtocolVersion,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Format of the once-per-second record summarising suppressed calls.
pub const SPAM_SUMMARY_FORMAT: &str = "* Suppressed %d in last 1s: %s";

/// Length of one suppression interval.
pub const SPAM_INTERVAL: Duration = Duration::from_secs(1);

/// What [`Forwarder::log`] did with a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDispatch {
    /// Handed to this many endpoints.
    Forwarded(usize),
    /// Dropped by rate suppression.
    Suppressed,
    /// The format string or its arguments were invalid.
    Malformed,
    /// Forwarding is disabled or no collector is attached.
    NoCollectors,
    /// Below the priority filter threshold.
    Filtered,
}

/// Forwards log calls from one process to every attached collector.
///
/// Create it on the thread that will call [`Forwarder::service`]; that
/// thread owns the endpoints' sockets. [`Forwarder::log`] may be called
/// from any thread.
pub struct Forwarder {
    config: ForwarderConfig,
    factory: Arc<dyn SocketFactory>,
    directory: Option<Box<dyn CollectorDirectory>>,
    owner: ThreadId,
    endpoints: RwLock<Vec<Arc<LoggerEndpoint>>>,
    handlers: RwLock<HashMap<String, Option<Arc<FormatHandler>>>>,
    patterns: RwLock<SuppressionPatterns>,
    recently_used: Mutex<Vec<Arc<FormatHandler>>>,
    summary: FormatHandler,
    enabled: AtomicBool,
    discovered: AtomicBool,
    app_id: AtomicU32,
    next_tick: Mutex<Instant>,
}

impl Forwarder {
    /// Creates a forwarder using real sockets.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary format string cannot be parsed.
    pub fn new(config: ForwarderConfig) -> ForwarderResult<Self> {
        Self::with_factory(config, Arc::new(NetSocketFactory))
    }

    /// Creates a forwarder whose endpoints open sockets through `factory`.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary format string cannot be parsed.
    pub fn with_factory(config: ForwarderConfig, factory: Arc<dyn SocketFactory>) -> ForwarderResult<Self> {
        let summary = FormatString::parse(SPAM_SUMMARY_FORMAT)
            .map_err(|e| ForwarderError::Protocol(e.into()))?;
        let patterns: SuppressionPatterns = config.suppression_patterns.iter().cloned().collect();
        let enabled = config.enabled;

        Ok(Self {
            config,
            factory,
            directory: None,
            owner: thread::current().id(),
            endpoints: RwLock::new(Vec::new()),
            handlers: RwLock::new(HashMap::new()),
            patterns: RwLock::new(patterns),
            recently_used: Mutex::new(Vec::new()),
            summary: FormatHandler::new(summary, false),
            enabled: AtomicBool::new(enabled),
            discovered: AtomicBool::new(false),
            app_id: AtomicU32::new(0),
            next_tick: Mutex::new(Instant::now() + SPAM_INTERVAL),
        })
    }

    /// Sets the directory queried by [`Forwarder::discover`].
    #[must_use]
    pub fn with_directory(mut self, directory: impl CollectorDirectory + 'static) -> Self {
        self.directory = Some(Box::new(directory));
        self
    }

    /// The forwarder's configuration.
    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Whether log calls are forwarded.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enables or disables forwarding. Enabling for the first time runs
    /// collector discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails.
    pub fn set_enabled(&self, enabled: bool) -> ForwarderResult<()> {
        self.enabled.store(enabled, Ordering::Release);
        if enabled && !self.discovered.load(Ordering::Acquire) {
            self.discover()?;
        }
        Ok(())
    }

    /// Registers with every collector the directory knows about.
    ///
    /// Collectors that cannot be attached are skipped. Returns how many
    /// endpoints were added.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory lookup fails.
    pub fn discover(&self) -> ForwarderResult<usize> {
        self.discovered.store(true, Ordering::Release);
        let Some(directory) = &self.directory else {
            return Ok(0);
        };

        let mut added = 0;
        for collector in directory.find_collectors()? {
            match self.add_collector(collector.addr, collector.version) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => warn!(collector = %collector.addr, error = %e, "skipping collector"),
            }
        }
        debug!(added, "collector discovery finished");
        Ok(added)
    }

    /// Handles a collector announcing itself after startup.
    ///
    /// # Errors
    ///
    /// See [`Forwarder::add_collector`].
    pub fn handle_registration_request(&self, addr: SocketAddr, version: ProtocolVersion) -> ForwarderResult<bool> {
        self.add_collector(addr, version)
    }

    /// Attaches a collector. Returns `false` if it was already attached.
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::Attach`] if neither TCP nor UDP is usable.
    pub fn add_collector(&self, addr: SocketAddr, version: ProtocolVersion) -> ForwarderResult<bool> {
        if addr.ip().is_unspecified() {
            return Err(ForwarderError::attach(addr, "unspecified collector address"));
        }
        if self.endpoints.read().iter().any(|ep| ep.addr() == addr) {
            warn!(collector = %addr, "collector already attached");
            return Ok(false);
        }

        let endpoint = LoggerEndpoint::with_owner(
            addr,
            version,
            self.config.endpoint.clone(),
            Arc::clone(&self.factory),
            self.owner,
        );
        endpoint.set_greeting(self.greeting(version));
        if !endpoint.init(Instant::now()) {
            return Err(ForwarderError::attach(addr, "no TCP or UDP socket available"));
        }

        let count = {
            let mut endpoints = self.endpoints.write();
            endpoints.push(Arc::new(endpoint));
            endpoints.len()
        };
        info!(collector = %addr, %version, collectors = count, "added collector");
        Ok(true)
    }

    /// Detaches a collector. Returns `false` if it was not attached.
    pub fn del_collector(&self, addr: SocketAddr) -> bool {
        let (removed, count) = {
            let mut endpoints = self.endpoints.write();
            let removed = endpoints
                .iter()
                .position(|ep| ep.addr() == addr)
                .map(|index| endpoints.remove(index));
            (removed, endpoints.len())
        };
        match removed {
            Some(endpoint) => {
                endpoint.close();
                info!(collector = %addr, collectors = count, "removed collector");
                true
            }
            None => false,
        }
    }

    /// Currently attached collectors.
    pub fn collectors(&self) -> Vec<CollectorInfo> {
        self.endpoints
            .read()
            .iter()
            .map(|ep| CollectorInfo::new(ep.addr(), ep.version()))
            .collect()
    }

    /// Frames queued across every endpoint and not yet written.
    pub fn pending(&self) -> usize {
        self.endpoints.read().iter().map(|ep| ep.pending()).sum()
    }

    /// The app instance id, or 0 if none has been assigned.
    pub fn app_id(&self) -> u32 {
        self.app_id.load(Ordering::Acquire)
    }

    /// Records this process's app instance id and tells every collector.
    pub fn register_app_id(&self, app_instance_id: u32) {
        self.app_id.store(app_instance_id, Ordering::Release);
        let frame_for = |version| LoggerMessage::AppId(AppIdAssignment { app_instance_id }).to_frame(version);

        for endpoint in self.endpoints.read().iter() {
            let connecting = endpoint.state() == EndpointState::Connecting;
            endpoint.set_greeting(self.greeting(endpoint.version()));
            // a connecting endpoint sends the new greeting once connected
            if !connecting && !endpoint.send(frame_for(endpoint.version())).is_accepted() {
                warn!(collector = %endpoint.addr(), "failed to send app id");
            }
        }
    }

    /// Adds a format string prefix eligible for spam suppression. Returns
    /// `false` if it was already present.
    pub fn add_suppression_pattern(&self, prefix: &str) -> bool {
        let added = self.patterns.write().add(prefix);
        if added {
            self.update_suppressible();
        } else {
            warn!(pattern = prefix, "not re-adding suppression pattern");
        }
        added
    }

    /// Removes a suppression prefix. Returns `false` if it was unknown.
    pub fn del_suppression_pattern(&self, prefix: &str) -> bool {
        let removed = self.patterns.write().remove(prefix);
        if removed {
            self.update_suppressible();
        } else {
            warn!(pattern = prefix, "unknown suppression pattern");
        }
        removed
    }

    fn update_suppressible(&self) {
        let patterns = self.patterns.read();
        for handler in self.handlers.read().values().flatten() {
            handler.set_suppressible(patterns.matches(handler.format().as_str()));
        }
    }

    /// Forwards one log call to every attached collector.
    ///
    /// Never fails; the returned value only reports what happened.
    pub fn log(
        &self,
        priority: Priority,
        category: &str,
        source: MessageSource,
        format: &str,
        args: &[Arg],
        metadata: Option<&Metadata>,
    ) -> LogDispatch {
        if !self.is_enabled() {
            return LogDispatch::NoCollectors;
        }
        let endpoints = self.endpoints.read().clone();
        if endpoints.is_empty() {
            return LogDispatch::NoCollectors;
        }
        if priority < self.config.filter_threshold {
            return LogDispatch::Filtered;
        }

        let Some(handler) = self.find_handler(format) else {
            return LogDispatch::Malformed;
        };

        let calls = handler.add_recent_call();
        let filter_spam = self.config.filter_spam;
        if filter_spam && handler.is_suppressible() && calls == 1 {
            self.recently_used.lock().push(Arc::clone(&handler));
        }
        if filter_spam && handler.is_spamming(self.config.spam_threshold) {
            return LogDispatch::Suppressed;
        }

        let stream = match handler.format().stream_args(args) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(format, error = %e, "log arguments do not match format");
                return LogDispatch::Malformed;
            }
        };

        let mut message = LogMessage::new(priority, format, stream)
            .with_category(category)
            .with_source(source);
        if let Some(metadata) = metadata {
            message = message.with_metadata(metadata.clone());
        }
        LogDispatch::Forwarded(Self::dispatch(&endpoints, &LoggerMessage::Log(message)))
    }

    /// Runs one reactor turn on the owning thread.
    ///
    /// Emits spam summaries once per interval, services every endpoint and
    /// drops the ones that asked to be removed. Returns the removed
    /// collectors.
    pub fn service(&self, now: Instant) -> Vec<(SocketAddr, RemovalReason)> {
        let tick_due = {
            let mut next_tick = self.next_tick.lock();
            if now >= *next_tick {
                *next_tick = now + SPAM_INTERVAL;
                true
            } else {
                false
            }
        };
        if tick_due {
            self.summarise_spam();
        }

        let endpoints = self.endpoints.read().clone();
        let mut removed = Vec::new();
        for endpoint in endpoints {
            if let EndpointStatus::Removed(reason) = endpoint.service(now) {
                removed.push((endpoint, reason));
            }
        }
        if removed.is_empty() {
            return Vec::new();
        }

        let remaining = {
            let mut endpoints = self.endpoints.write();
            endpoints.retain(|ep| !removed.iter().any(|(gone, _)| Arc::ptr_eq(ep, gone)));
            endpoints.len()
        };
        removed
            .into_iter()
            .map(|(endpoint, reason)| {
                endpoint.close();
                info!(collector = %endpoint.addr(), ?reason, collectors = remaining, "removed collector");
                (endpoint.addr(), reason)
            })
            .collect()
    }

    fn summarise_spam(&self) {
        if !self.config.filter_spam {
            return;
        }
        let handlers = std::mem::take(&mut *self.recently_used.lock());
        let threshold = self.config.spam_threshold;
        let endpoints = self.endpoints.read().clone();

        for handler in handlers {
            if self.config.summarise_spam && handler.is_spamming(threshold) {
                let suppressed = handler.recent_calls() - threshold;
                let args = [Arg::Int(i64::from(suppressed)), Arg::from(handler.format().as_str())];
                match self.summary.format().stream_args(&args) {
                    Ok(stream) => {
                        let message = LogMessage::new(Priority::Debug, SPAM_SUMMARY_FORMAT, stream);
                        Self::dispatch(&endpoints, &LoggerMessage::Log(message));
                    }
                    Err(e) => debug!(error = %e, "cannot encode spam summary"),
                }
            }
            handler.clear_recent_calls();
        }
    }

    fn find_handler(&self, format: &str) -> Option<Arc<FormatHandler>> {
        if let Some(handler) = self.handlers.read().get(format) {
            return handler.clone();
        }

        let handler = match FormatString::parse(format) {
            Ok(parsed) => {
                let suppressible = self.patterns.read().matches(format);
                Some(Arc::new(FormatHandler::new(parsed, suppressible)))
            }
            Err(e) => {
                warn!(format, error = %e, "invalid format string");
                None
            }
        };
        self.handlers
            .write()
            .entry(format.to_string())
            .or_insert(handler)
            .clone()
    }

    fn greeting(&self, version: ProtocolVersion) -> Vec<Bytes> {
        let registration = ComponentRegistration::new(
            self.config.component_name.clone(),
            self.config.uid,
            self.config.pid,
        )
        .with_logger_id(self.config.logger_id.clone());

        let mut frames = vec![LoggerMessage::Register(registration).to_frame(version)];
        let app_instance_id = self.app_id();
        if app_instance_id > 0 {
            frames.push(LoggerMessage::AppId(AppIdAssignment { app_instance_id }).to_frame(version));
        }
        frames
    }

    /// Sends `message` to every endpoint, encoding it once per distinct
    /// collector version. Returns how many endpoints accepted it.
    fn dispatch(endpoints: &[Arc<LoggerEndpoint>], message: &LoggerMessage) -> usize {
        let mut frames: Vec<(ProtocolVersion, Bytes)> = Vec::new();
        let mut accepted = 0;
        for endpoint in endpoints {
            let version = endpoint.version();
            let frame = match frames.iter().find(|(v, _)| *v == version) {
                Some((_, frame)) => frame.clone(),
                None => {
                    let frame = message.to_frame(version);
                    frames.push((version, frame.clone()));
                    frame
                }
            };
            if endpoint.send(frame).is_accepted() {
                accepted += 1;
            }
        }
        accepted
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        for endpoint in self.endpoints.get_mut().drain(..) {
            endpoint.close();
        }
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("component", &self.config.component_name)
            .field("collectors", &self.endpoints.read().len())
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
