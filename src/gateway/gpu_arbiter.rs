//! GPU arbitration between the chat model and the image backend
//!
//! Only one of the two consumers may hold the accelerator. Every transition
//! runs under a single async lock so a chat request and the image worker can
//! never interleave their switches.
//!
//! Transitions are fail-open: if the model runtime rejects the load/unload
//! signal, the occupant is updated anyway and the transition is flagged as
//! degraded. A dead runtime must not wedge the scheduler.

use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::traits::ModelRuntime;

/// Which consumer currently holds the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuOccupant {
    Chat,
    Image,
}

impl fmt::Display for GpuOccupant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuOccupant::Chat => f.write_str("chat"),
            GpuOccupant::Image => f.write_str("image"),
        }
    }
}

#[derive(Debug)]
struct ArbiterState {
    occupant: GpuOccupant,
    last_activity: Instant,
    last_transition_degraded: bool,
    transitions: u64,
}

/// Read-only view of the arbiter
#[derive(Debug, Clone, Serialize)]
pub struct GpuStatus {
    pub occupant: GpuOccupant,
    pub secs_since_activity: u64,
    pub last_transition_degraded: bool,
    pub transitions: u64,
}

/// Serializes access to the shared accelerator
pub struct GpuArbiter {
    runtime: Arc<dyn ModelRuntime>,
    chat_model: String,
    transition_lock: Mutex<()>,
    state: RwLock<ArbiterState>,
}

impl GpuArbiter {
    /// Create an arbiter with the chat model as the initial occupant
    pub fn new(runtime: Arc<dyn ModelRuntime>, chat_model: impl Into<String>) -> Self {
        Self {
            runtime,
            chat_model: chat_model.into(),
            transition_lock: Mutex::new(()),
            state: RwLock::new(ArbiterState {
                occupant: GpuOccupant::Chat,
                last_activity: Instant::now(),
                last_transition_degraded: false,
                transitions: 0,
            }),
        }
    }

    pub fn occupant(&self) -> GpuOccupant {
        self.state.read().occupant
    }

    pub fn status(&self) -> GpuStatus {
        let state = self.state.read();
        GpuStatus {
            occupant: state.occupant,
            secs_since_activity: state.last_activity.elapsed().as_secs(),
            last_transition_degraded: state.last_transition_degraded,
            transitions: state.transitions,
        }
    }

    /// Hand the GPU to the chat model, warm-loading it if the image backend held it
    pub async fn request_chat_access(&self) {
        let _guard = self.transition_lock.lock().await;

        if self.occupant() == GpuOccupant::Chat {
            self.state.write().last_activity = Instant::now();
            return;
        }

        info!(model = %self.chat_model, "Switching GPU to chat mode");
        let degraded = match self.runtime.load(&self.chat_model).await {
            Ok(()) => false,
            Err(e) => {
                warn!(model = %self.chat_model, error = %e, "Chat model warm-load failed; switching anyway");
                true
            }
        };
        self.commit(GpuOccupant::Chat, degraded);
    }

    /// Hand the GPU to the image backend, unloading the chat model first
    pub async fn request_image_access(&self) {
        let _guard = self.transition_lock.lock().await;

        if self.occupant() == GpuOccupant::Image {
            self.state.write().last_activity = Instant::now();
            return;
        }

        info!(model = %self.chat_model, "Switching GPU to image mode");
        let degraded = match self.runtime.unload(&self.chat_model).await {
            Ok(()) => false,
            Err(e) => {
                warn!(model = %self.chat_model, error = %e, "Chat model unload failed; switching anyway");
                true
            }
        };
        self.commit(GpuOccupant::Image, degraded);
    }

    fn commit(&self, occupant: GpuOccupant, degraded: bool) {
        let mut state = self.state.write();
        state.occupant = occupant;
        state.last_activity = Instant::now();
        state.last_transition_degraded = degraded;
        state.transitions += 1;
        debug!(occupant = %occupant, degraded, transitions = state.transitions, "GPU transition committed");
    }
}
