//! Command dispatch: the registry that owns every run session.

pub mod coordinator;

use std::sync::Arc;

pub use coordinator::{Coordinator, DispatchError, TransportFactory};

use crate::config::CosimConfig;
use crate::run::EventSink;
use crate::transport::TransportSession;

/// Builds a coordinator whose sessions talk to real engine subprocesses.
pub fn from_config(config: &CosimConfig, events: Arc<dyn EventSink>) -> Coordinator<TransportSession> {
    let settings = config.transport_settings();
    let slice = settings.poll_interval;
    Coordinator::new(
        config.dispatcher.max_sessions,
        move || TransportSession::new(settings.clone()),
        events,
    )
    .with_pacing_slice(slice)
}
