//! Construction of runnable phases from their configuration

use crate::lifecycle::LifecycleContext;
use crate::phase::Phase;
use crate::phase_config::PhaseConfigProvider;
use std::sync::Arc;

/// Turns a finished [`PhaseConfigProvider`] into a [`Phase`]
pub trait PhaseFactory: Send + Sync {
    fn new_phase(&self, provider: PhaseConfigProvider) -> Phase;
}

/// Binds every phase it creates to one lifecycle context, so they share
/// its runtime, volumes and staging barrier
#[derive(Clone)]
pub struct DefaultPhaseFactory {
    lifecycle: Arc<LifecycleContext>,
}

impl DefaultPhaseFactory {
    pub fn new(lifecycle: Arc<LifecycleContext>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleContext> {
        &self.lifecycle
    }
}

impl PhaseFactory for DefaultPhaseFactory {
    fn new_phase(&self, provider: PhaseConfigProvider) -> Phase {
        Phase::new(provider, &self.lifecycle)
    }
}
