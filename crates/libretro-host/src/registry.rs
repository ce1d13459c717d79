//! Process-wide routing table for C callbacks.
//!
//! libretro callbacks carry no user pointer, so each console kit has one slot
//! naming the session its callbacks reach.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::audio::RingProducer;
use crate::console::{ConsoleId, ConsoleProfile};
use crate::error::LoadError;
use crate::input::InputState;
use crate::video::VideoSink;

/// State reachable from the C callbacks of one session.
pub struct SessionShared {
    pub(crate) profile: ConsoleProfile,
    pub(crate) input: InputState,
    pub(crate) video: Mutex<VideoSink>,
    pub(crate) audio: Mutex<Option<RingProducer>>,
    /// Option defaults declared by the core through `SET_VARIABLES`.
    pub(crate) variables: Mutex<HashMap<String, String>>,
    pub(crate) save_dir: PathBuf,
    pub(crate) system_dir: PathBuf,
    pub(crate) audio_frames: AtomicU64,
}

impl SessionShared {
    pub(crate) fn new(
        profile: ConsoleProfile,
        video: VideoSink,
        save_dir: PathBuf,
        system_dir: PathBuf,
    ) -> Self {
        Self {
            input: InputState::new(profile.action_buttons),
            profile,
            video: Mutex::new(video),
            audio: Mutex::new(None),
            variables: Mutex::new(HashMap::new()),
            save_dir,
            system_dir,
            audio_frames: AtomicU64::new(0),
        }
    }

    /// Value the core sees for option `key`: host override first, then its own default.
    pub(crate) fn variable(&self, key: &str) -> Option<String> {
        if let Some(value) = self.profile.core_option(key) {
            return Some(value.to_owned());
        }
        self.variables.lock().get(key).cloned()
    }
}

/// Identifies one registration; a stale token cannot evict a newer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

type Slot = (SessionToken, Arc<SessionShared>);

static REGISTRY: Lazy<Mutex<HashMap<ConsoleId, Slot>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Claims the slot for `console`. Fails if a live session already holds it.
pub(crate) fn register(
    console: ConsoleId,
    shared: Arc<SessionShared>,
) -> Result<SessionToken, LoadError> {
    let mut registry = REGISTRY.lock();
    if registry.contains_key(&console) {
        return Err(LoadError::Registry);
    }
    let token = SessionToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
    registry.insert(console, (token, shared));
    Ok(token)
}

/// Releases the slot if `token` still owns it. Returns whether anything was removed.
pub(crate) fn unregister(console: ConsoleId, token: SessionToken) -> bool {
    let mut registry = REGISTRY.lock();
    match registry.get(&console) {
        Some((owner, _)) if *owner == token => {
            registry.remove(&console);
            true
        }
        _ => false,
    }
}

pub(crate) fn lookup(console: ConsoleId) -> Option<Arc<SessionShared>> {
    REGISTRY.lock().get(&console).map(|(_, shared)| shared.clone())
}

/// Whether a session is currently registered for `console`.
pub fn is_registered(console: ConsoleId) -> bool {
    REGISTRY.lock().contains_key(&console)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{ConsoleKit, Genesis};
    use crate::video::{NullUploader, PixelFormat};

    fn shared() -> Arc<SessionShared> {
        let profile = Genesis::profile().with_core_option("picodrive_region", "US");
        Arc::new(SessionShared::new(
            profile,
            VideoSink::new(Box::new(NullUploader), PixelFormat::Rgb565),
            PathBuf::from("/tmp/saves/picodrive"),
            PathBuf::from("/tmp/system"),
        ))
    }

    // Only this test touches the Genesis slot.
    #[test]
    fn slots_are_owned_by_their_token() {
        let first = register(ConsoleId::Genesis, shared()).expect("register");
        assert!(matches!(
            register(ConsoleId::Genesis, shared()),
            Err(LoadError::Registry)
        ));
        assert!(unregister(ConsoleId::Genesis, first));
        assert!(!is_registered(ConsoleId::Genesis));

        let second = register(ConsoleId::Genesis, shared()).expect("register");
        assert_ne!(first, second);
        // A late teardown of the first session must not evict the second.
        assert!(!unregister(ConsoleId::Genesis, first));
        assert!(lookup(ConsoleId::Genesis).is_some());
        assert!(unregister(ConsoleId::Genesis, second));
        assert!(lookup(ConsoleId::Genesis).is_none());
    }

    #[test]
    fn host_overrides_shadow_core_defaults() {
        let shared = shared();
        shared
            .variables
            .lock()
            .insert("picodrive_region".into(), "Auto".into());
        shared
            .variables
            .lock()
            .insert("picodrive_input1".into(), "3 button pad".into());
        assert_eq!(shared.variable("picodrive_region").as_deref(), Some("US"));
        assert_eq!(
            shared.variable("picodrive_input1").as_deref(),
            Some("3 button pad")
        );
        assert_eq!(shared.variable("unknown"), None);
    }
}
