//! Session id to inbound track bindings
//!
//! Written by the negotiation path when a session connects and read by the
//! control path when a recording starts. Access is serialized by one mutex.

use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct Binding<T> {
    track: Arc<T>,
    recording: bool,
}

type Bindings<T> = Arc<Mutex<HashMap<String, Binding<T>>>>;

/// Shared map of session id to its current track
pub struct TrackRegistry<T> {
    bindings: Bindings<T>,
}

impl<T> Clone for TrackRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            bindings: self.bindings.clone(),
        }
    }
}

impl<T> Default for TrackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TrackRegistry<T> {
    pub fn new() -> Self {
        Self {
            bindings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Bind `track` to `id`, replacing any earlier binding
    pub fn register(&self, id: &str, track: Arc<T>) {
        let previous = self.bindings.lock().insert(
            id.to_string(),
            Binding {
                track,
                recording: false,
            },
        );
        if previous.is_some() {
            debug!("Track for {} replaced", id);
        }
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<T>> {
        self.bindings.lock().get(id).map(|b| b.track.clone())
    }

    /// Remove the binding for `id` only if it still points at `track`
    pub fn unregister(&self, id: &str, track: &Arc<T>) -> bool {
        let mut bindings = self.bindings.lock();
        match bindings.get(id) {
            Some(binding) if Arc::ptr_eq(&binding.track, track) => {
                bindings.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Mark `id` as recording. `None` if the id is unknown or already claimed.
    pub fn claim(&self, id: &str) -> Option<RecordingClaim<T>> {
        let mut bindings = self.bindings.lock();
        let binding = bindings.get_mut(id)?;
        if binding.recording {
            return None;
        }
        binding.recording = true;
        Some(RecordingClaim {
            id: id.to_string(),
            track: binding.track.clone(),
            bindings: self.bindings.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive right to record one binding; released on drop
pub struct RecordingClaim<T> {
    id: String,
    track: Arc<T>,
    bindings: Bindings<T>,
}

impl<T> RecordingClaim<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn track(&self) -> &Arc<T> {
        &self.track
    }
}

impl<T> Drop for RecordingClaim<T> {
    fn drop(&mut self) {
        if let Some(binding) = self.bindings.lock().get_mut(&self.id) {
            if Arc::ptr_eq(&binding.track, &self.track) {
                binding.recording = false;
            }
        }
    }
}
