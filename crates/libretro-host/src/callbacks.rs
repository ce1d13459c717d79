//! The C-ABI callbacks handed to a core, monomorphised per console kit.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_uint, c_void};
use std::path::Path;
use std::sync::atomic::Ordering;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::console::ConsoleKit;
use crate::loader::FunctionTable;
use crate::raw;
use crate::registry::{self, SessionShared};
use crate::video::PixelFormat;

/// Installs the six callbacks for kit `K` on a freshly loaded core.
pub(crate) fn install<K: ConsoleKit>(table: &FunctionTable) {
    // SAFETY: the setters only store the pointers; every callback is `'static`.
    unsafe {
        (table.set_environment)(Some(environment::<K>));
        (table.set_video_refresh)(Some(video_refresh::<K>));
        (table.set_audio_sample)(Some(audio_sample::<K>));
        (table.set_audio_sample_batch)(Some(audio_sample_batch::<K>));
        (table.set_input_poll)(Some(input_poll::<K>));
        (table.set_input_state)(Some(input_state::<K>));
    }
}

/// Strings handed to cores must outlive every session, so they are leaked once per value.
static INTERNED: Lazy<Mutex<HashMap<String, &'static CStr>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn intern(value: &str) -> Option<*const c_char> {
    let mut interned = INTERNED.lock();
    if let Some(existing) = interned.get(value) {
        return Some(existing.as_ptr());
    }
    let owned = CString::new(value).ok()?;
    let leaked: &'static CStr = Box::leak(owned.into_boxed_c_str());
    interned.insert(value.to_owned(), leaked);
    Some(leaked.as_ptr())
}

fn directory_pointer(dir: &Path) -> Option<*const c_char> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!("failed to create {:?}: {}", dir, e);
    }
    intern(&dir.to_string_lossy())
}

/// Default value of a `SET_VARIABLES` entry: the first choice in `"Desc; a|b|c"`.
pub(crate) fn option_default(declaration: &str) -> Option<&str> {
    let (_, choices) = declaration.split_once(';')?;
    choices
        .trim_start()
        .split('|')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null strings from the core are NUL terminated.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Dispatches one environment command for `shared`.
///
/// # Safety
///
/// `data` must be null or point at the payload type libretro defines for `cmd`.
pub(crate) unsafe fn handle_environment(
    shared: &SessionShared,
    cmd: c_uint,
    data: *mut c_void,
) -> bool {
    match cmd {
        raw::RETRO_ENVIRONMENT_GET_CAN_DUPE => {
            if data.is_null() {
                return false;
            }
            unsafe { *data.cast::<bool>() = true };
            true
        }
        raw::RETRO_ENVIRONMENT_SET_PIXEL_FORMAT => {
            if data.is_null() {
                return false;
            }
            let requested = unsafe { *data.cast::<c_uint>() };
            match PixelFormat::from_raw(requested) {
                Some(format) => {
                    tracing::debug!("core negotiated pixel format {:?}", format);
                    shared.video.lock().set_pixel_format(format);
                    true
                }
                None => {
                    tracing::warn!("core requested unsupported pixel format {}", requested);
                    false
                }
            }
        }
        raw::RETRO_ENVIRONMENT_GET_SYSTEM_DIRECTORY | raw::RETRO_ENVIRONMENT_GET_SAVE_DIRECTORY => {
            if data.is_null() {
                return false;
            }
            let dir = if cmd == raw::RETRO_ENVIRONMENT_GET_SAVE_DIRECTORY {
                &shared.save_dir
            } else {
                &shared.system_dir
            };
            match directory_pointer(dir) {
                Some(ptr) => {
                    unsafe { *data.cast::<*const c_char>() = ptr };
                    tracing::debug!("core directory request {} -> {:?}", cmd, dir);
                    true
                }
                None => false,
            }
        }
        raw::RETRO_ENVIRONMENT_SET_VARIABLES => {
            if data.is_null() {
                return false;
            }
            let mut vars = data.cast::<raw::retro_variable>().cast_const();
            let mut recorded = shared.variables.lock();
            loop {
                let var = unsafe { *vars };
                let Some(key) = (unsafe { c_str(var.key) }) else {
                    break;
                };
                if let Some(default) = unsafe { c_str(var.value) }.and_then(option_default) {
                    tracing::debug!("core option {} defaults to {}", key, default);
                    recorded.insert(key.to_owned(), default.to_owned());
                }
                vars = unsafe { vars.add(1) };
            }
            true
        }
        raw::RETRO_ENVIRONMENT_GET_VARIABLE => {
            if data.is_null() {
                return false;
            }
            let var = data.cast::<raw::retro_variable>();
            let Some(key) = (unsafe { c_str((*var).key) }) else {
                return false;
            };
            match shared.variable(key).as_deref().and_then(intern) {
                Some(value) => {
                    unsafe { (*var).value = value };
                    true
                }
                None => {
                    unsafe { (*var).value = std::ptr::null() };
                    false
                }
            }
        }
        raw::RETRO_ENVIRONMENT_GET_VARIABLE_UPDATE => {
            if data.is_null() {
                return false;
            }
            unsafe { *data.cast::<bool>() = false };
            true
        }
        raw::RETRO_ENVIRONMENT_SET_SUPPORT_NO_GAME | raw::RETRO_ENVIRONMENT_GET_INPUT_BITMASKS => {
            true
        }
        other => {
            tracing::trace!("unhandled environment command {}", other);
            false
        }
    }
}

unsafe extern "C" fn environment<K: ConsoleKit>(cmd: c_uint, data: *mut c_void) -> bool {
    match registry::lookup(K::ID) {
        // SAFETY: the core passes the payload defined for `cmd`.
        Some(shared) => unsafe { handle_environment(&shared, cmd, data) },
        None => false,
    }
}

unsafe extern "C" fn video_refresh<K: ConsoleKit>(
    data: *const c_void,
    width: c_uint,
    height: c_uint,
    pitch: usize,
) {
    if let Some(shared) = registry::lookup(K::ID) {
        // SAFETY: libretro guarantees the framebuffer covers `pitch * height`
        // bytes until this callback returns.
        unsafe { shared.video.lock().submit_raw(data, width, height, pitch) };
    }
}

unsafe extern "C" fn audio_sample<K: ConsoleKit>(left: i16, right: i16) {
    if let Some(shared) = registry::lookup(K::ID) {
        shared.audio_frames.fetch_add(1, Ordering::Relaxed);
        if let Some(producer) = shared.audio.lock().as_mut() {
            producer.write_frame(left, right);
        }
    }
}

unsafe extern "C" fn audio_sample_batch<K: ConsoleKit>(data: *const i16, frames: usize) -> usize {
    if data.is_null() || frames == 0 {
        return 0;
    }
    let Some(shared) = registry::lookup(K::ID) else {
        return 0;
    };
    // SAFETY: the core hands over `frames` interleaved stereo frames.
    let samples = unsafe { std::slice::from_raw_parts(data, frames * 2) };
    shared
        .audio_frames
        .fetch_add(frames as u64, Ordering::Relaxed);
    if let Some(producer) = shared.audio.lock().as_mut() {
        producer.write(samples, frames);
    }
    frames
}

unsafe extern "C" fn input_poll<K: ConsoleKit>() {
    if let Some(shared) = registry::lookup(K::ID) {
        shared.input.note_poll();
    }
}

unsafe extern "C" fn input_state<K: ConsoleKit>(
    port: c_uint,
    device: c_uint,
    index: c_uint,
    id: c_uint,
) -> i16 {
    registry::lookup(K::ID)
        .map(|shared| shared.input.state(port, device, index, id))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_default_takes_first_choice() {
        assert_eq!(option_default("Console Mode; DS|DSi"), Some("DS"));
        assert_eq!(option_default("Frameskip;disabled|auto"), Some("disabled"));
        assert_eq!(option_default("No choices"), None);
        assert_eq!(option_default("Empty; "), None);
    }

    #[test]
    fn interned_strings_are_stable() {
        let a = intern("/tmp/retro/system").expect("interned");
        let b = intern("/tmp/retro/system").expect("interned");
        assert_eq!(a, b);
        let text = unsafe { CStr::from_ptr(a) }.to_str().expect("utf8");
        assert_eq!(text, "/tmp/retro/system");
        assert!(intern("nul\0inside").is_none());
    }
}
