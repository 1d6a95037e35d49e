//! Delegated handshake work.
//!
//! Key agreement, signing and certificate checks are too slow for a
//! non-blocking call. When the engine meets a handshake message that needs
//! them it lends its handshake state machine to a [`DelegatedTask`] and
//! reports `NeedTask` until the task handed it back.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::CryptoError;
use crate::handshake::Handshake;
use crate::Error;

/// The state machine and what processing the message did to it.
pub(crate) struct TaskOutcome {
    pub handshake: Handshake,
    pub result: Result<(), Error>,
}

/// Where a task leaves its outcome for the engine.
pub(crate) type TaskSlot = Arc<Mutex<Option<TaskOutcome>>>;

pub(crate) fn new_slot() -> TaskSlot {
    Arc::new(Mutex::new(None))
}

pub(crate) fn take_outcome(slot: &TaskSlot) -> Option<TaskOutcome> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}

/// Expensive handshake work handed to the application.
///
/// Obtained from [`Engine::delegated_task`](crate::Engine::delegated_task).
/// Run it on any thread, then call `wrap` or `unwrap` again. A task dropped
/// without running fails the handshake with [`Error::Internal`].
pub struct DelegatedTask {
    work: Option<(Handshake, Vec<u8>)>,
    slot: TaskSlot,
}

impl DelegatedTask {
    pub(crate) fn new(handshake: Handshake, message: Vec<u8>, slot: TaskSlot) -> Self {
        DelegatedTask {
            work: Some((handshake, message)),
            slot,
        }
    }

    /// Process the handshake message.
    ///
    /// Protocol failures are reported by the engine's next call. A failing
    /// crypto provider is also returned here.
    pub fn run(mut self) -> Result<(), CryptoError> {
        let Some((mut handshake, message)) = self.work.take() else {
            return Ok(());
        };

        trace!("Running delegated task ({} bytes)", message.len());
        let result = handshake.process(&message);

        let returned = match &result {
            Err(Error::Crypto(e)) => Err(e.clone()),
            _ => Ok(()),
        };
        self.finish(TaskOutcome { handshake, result });
        returned
    }

    fn finish(&self, outcome: TaskOutcome) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome);
    }
}

impl Drop for DelegatedTask {
    fn drop(&mut self) {
        if let Some((handshake, _)) = self.work.take() {
            warn!("Delegated task dropped without running");
            self.finish(TaskOutcome {
                handshake,
                result: Err(Error::Internal(
                    "delegated task dropped without running".to_string(),
                )),
            });
        }
    }
}

impl fmt::Debug for DelegatedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedTask")
            .field("pending", &self.work.is_some())
            .finish()
    }
}
