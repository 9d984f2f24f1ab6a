// Channel bridge for nbplayer
// Exposes the playback controllers to the UI layer as method calls with JSON
// argument maps, plus JNI entry points on Android.

pub mod channel;
pub mod plugin;

#[cfg(feature = "android")]
pub mod jni_bindings;

pub use channel::{event_channel_name, method_channel_name, MethodCall, MethodResult, StateChangeRecord, GLOBAL_CHANNEL};
pub use plugin::{EventChannelSink, NbPlayerPlugin};

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialize logging based on platform. Safe to call more than once.
pub fn init_logging() {
    INIT_LOGGER.call_once(|| {
        #[cfg(target_os = "android")]
        {
            android_logger::init_once(
                android_logger::Config::default()
                    .with_max_level(log::LevelFilter::Debug)
                    .with_tag("NbPlayer"),
            );
        }

        #[cfg(not(target_os = "android"))]
        {
            let _ = env_logger::builder()
                .is_test(false)
                .filter_level(log::LevelFilter::Info)
                .parse_default_env()
                .try_init();
        }
    });
}
