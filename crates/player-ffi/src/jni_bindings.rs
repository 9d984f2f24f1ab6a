// JNI bindings for Android
// Bridges com.nbplayer.nbplayer.NativeBridge to the plugin, and drives the
// Java-side engine wrapper (an IjkMediaPlayer holder) through JNI calls.

use crate::channel::{MethodCall, MethodResult};
use crate::plugin::{EventChannelSink, NbPlayerPlugin};
use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::{jint, jlong, jstring};
use jni::{JNIEnv, JavaVM};
use nbplayer_core::{EngineError, EngineEvent, EngineFactory, EngineListener, EngineOption, MediaEngine, OptionValue, PlayerConfig};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

// Engine callback kinds passed to nativeOnEngineEvent
const EVENT_PREPARED: jint = 0;
const EVENT_COMPLETED: jint = 1;
const EVENT_ERROR: jint = 2;
const EVENT_INFO: jint = 3;
const EVENT_SEEK_COMPLETE: jint = 4;

static PLUGIN: Lazy<RwLock<Option<Arc<NbPlayerPlugin>>>> = Lazy::new(|| RwLock::new(None));

static ENGINE_LISTENERS: Lazy<Mutex<HashMap<i64, EngineListener>>> = Lazy::new(|| Mutex::new(HashMap::new()));

static NEXT_ENGINE_TOKEN: AtomicI64 = AtomicI64::new(1);

fn jni_err(e: jni::errors::Error) -> EngineError {
    EngineError::Call(e.to_string())
}

fn clear_exception(env: &mut JNIEnv) {
    if env.exception_check().unwrap_or(false) {
        let _ = env.exception_describe();
        let _ = env.exception_clear();
    }
}

fn jstring_to_string(env: &mut JNIEnv, jstr: &JString) -> Option<String> {
    if jstr.is_null() {
        return None;
    }
    match env.get_string(jstr) {
        Ok(s) => Some(s.into()),
        Err(e) => {
            log::error!("Failed to convert string: {}", e);
            None
        }
    }
}

fn string_to_jstring(env: &mut JNIEnv, s: &str) -> jstring {
    env.new_string(s)
        .map(|j| j.into_raw())
        .unwrap_or(std::ptr::null_mut())
}

fn result_to_jstring(env: &mut JNIEnv, result: &MethodResult) -> jstring {
    match serde_json::to_string(result) {
        Ok(json) => string_to_jstring(env, &json),
        Err(e) => {
            log::error!("Failed to encode method result: {}", e);
            std::ptr::null_mut()
        }
    }
}

fn parse_call(env: &mut JNIEnv, method: &JString, args_json: &JString) -> Result<MethodCall, MethodResult> {
    let method = jstring_to_string(env, method)
        .ok_or_else(|| MethodResult::error("INVALID_ARGUMENT", "method cannot be null"))?;
    let arguments = match jstring_to_string(env, args_json) {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .map_err(|e| MethodResult::error("INVALID_ARGUMENT", format!("malformed arguments: {}", e)))?,
        _ => Value::Null,
    };
    Ok(MethodCall { method, arguments })
}

/// `android.os.Build.VERSION.RELEASE`, e.g. "14".
fn android_release(env: &mut JNIEnv) -> Option<String> {
    let value = env
        .get_static_field("android/os/Build$VERSION", "RELEASE", "Ljava/lang/String;")
        .and_then(|v| v.l());
    match value {
        Ok(object) if !object.is_null() => jstring_to_string(env, &JString::from(object)),
        Ok(_) => None,
        Err(e) => {
            clear_exception(env);
            log::warn!("Failed to read Build.VERSION.RELEASE: {}", e);
            None
        }
    }
}

fn plugin() -> Result<Arc<NbPlayerPlugin>, MethodResult> {
    PLUGIN
        .read()
        .clone()
        .ok_or_else(|| MethodResult::error("NOT_INITIALIZED", "nativeInit has not been called"))
}

/// Creates Java engine wrappers through `NativeBridge.createEngine(String, long)`
struct JniEngineFactory {
    vm: Arc<JavaVM>,
    bridge: GlobalRef,
}

impl EngineFactory for JniEngineFactory {
    fn create(&self, player_id: &str, listener: EngineListener) -> Result<Box<dyn MediaEngine>, EngineError> {
        let token = NEXT_ENGINE_TOKEN.fetch_add(1, Ordering::Relaxed);
        let mut env = self
            .vm
            .attach_current_thread()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        let id = env.new_string(player_id).map_err(jni_err)?;
        let created = env
            .call_method(
                self.bridge.as_obj(),
                "createEngine",
                "(Ljava/lang/String;J)Ljava/lang/Object;",
                &[JValue::Object(&*id), JValue::Long(token)],
            )
            .and_then(|v| v.l());
        let object = match created {
            Ok(object) if !object.is_null() => object,
            Ok(_) => return Err(EngineError::Create("createEngine returned null".to_string())),
            Err(e) => {
                clear_exception(&mut env);
                return Err(EngineError::Create(e.to_string()));
            }
        };
        let object = env.new_global_ref(object).map_err(jni_err)?;

        ENGINE_LISTENERS.lock().insert(token, listener);
        log::info!("Engine {} created for player {}", token, player_id);
        Ok(Box::new(JniEngine {
            vm: self.vm.clone(),
            object,
            token,
        }))
    }
}

/// Engine backed by a Java object exposing the IjkMediaPlayer control surface
struct JniEngine {
    vm: Arc<JavaVM>,
    object: GlobalRef,
    token: i64,
}

impl JniEngine {
    fn with_env<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut JNIEnv, &JObject) -> jni::errors::Result<T>,
    {
        let mut env = self
            .vm
            .attach_current_thread()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        match f(&mut env, self.object.as_obj()) {
            Ok(value) => Ok(value),
            Err(e) => {
                clear_exception(&mut env);
                Err(jni_err(e))
            }
        }
    }

    fn call_void(&self, name: &str, sig: &str) -> Result<(), EngineError> {
        self.with_env(|env, object| env.call_method(object, name, sig, &[]).map(|_| ()))
    }

    fn forget_listener(&self) {
        ENGINE_LISTENERS.lock().remove(&self.token);
    }
}

impl MediaEngine for JniEngine {
    fn set_option(&mut self, option: &EngineOption) -> Result<(), EngineError> {
        let category = option.category.id();
        self.with_env(|env, object| {
            let name = env.new_string(&option.name)?;
            match &option.value {
                OptionValue::Int(value) => env.call_method(
                    object,
                    "setOption",
                    "(ILjava/lang/String;J)V",
                    &[JValue::Int(category), JValue::Object(&*name), JValue::Long(*value)],
                )?,
                OptionValue::Str(value) => {
                    let value = env.new_string(value)?;
                    env.call_method(
                        object,
                        "setOption",
                        "(ILjava/lang/String;Ljava/lang/String;)V",
                        &[JValue::Int(category), JValue::Object(&*name), JValue::Object(&*value)],
                    )?
                }
            };
            Ok(())
        })
    }

    fn set_data_source(&mut self, uri: &str) -> Result<(), EngineError> {
        self.with_env(|env, object| {
            let uri = env.new_string(uri)?;
            env.call_method(object, "setDataSource", "(Ljava/lang/String;)V", &[JValue::Object(&*uri)])?;
            Ok(())
        })
    }

    fn prepare_async(&mut self) -> Result<(), EngineError> {
        self.call_void("prepareAsync", "()V")
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.call_void("start", "()V")
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.call_void("pause", "()V")
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.call_void("stop", "()V")
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.call_void("reset", "()V")
    }

    fn release(&mut self) -> Result<(), EngineError> {
        self.forget_listener();
        self.call_void("release", "()V")
    }

    fn is_playing(&self) -> bool {
        self.with_env(|env, object| env.call_method(object, "isPlaying", "()Z", &[])?.z())
            .unwrap_or(false)
    }
}

impl Drop for JniEngine {
    fn drop(&mut self) {
        self.forget_listener();
    }
}

/// Forwards encoded events to a Java `success(String)` sink
struct JniEventSink {
    vm: Arc<JavaVM>,
    sink: GlobalRef,
}

impl EventChannelSink for JniEventSink {
    fn success(&self, event: Value) {
        // Runs on the dispatcher thread, which stays attached
        let mut env = match self.vm.attach_current_thread_permanently() {
            Ok(env) => env,
            Err(e) => {
                log::error!("Failed to attach dispatcher thread: {}", e);
                return;
            }
        };
        let payload = match env.new_string(event.to_string()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to encode event: {}", e);
                return;
            }
        };
        if let Err(e) = env.call_method(
            self.sink.as_obj(),
            "success",
            "(Ljava/lang/String;)V",
            &[JValue::Object(&*payload)],
        ) {
            clear_exception(&mut env);
            log::error!("Failed to deliver event: {}", e);
        }
        let _ = env.delete_local_ref(payload);
    }
}

/// Install the plugin. `bridge` must implement `createEngine(String, long)`.
#[no_mangle]
pub extern "system" fn Java_com_nbplayer_nbplayer_NativeBridge_nativeInit(
    mut env: JNIEnv,
    _class: JClass,
    bridge: JObject,
    config_toml: JString,
) -> jint {
    crate::init_logging();

    let config = match jstring_to_string(&mut env, &config_toml) {
        Some(raw) if !raw.trim().is_empty() => match PlayerConfig::from_toml_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Invalid player config: {}", e);
                return -1;
            }
        },
        _ => PlayerConfig::default(),
    };

    let vm = match env.get_java_vm() {
        Ok(vm) => Arc::new(vm),
        Err(e) => {
            log::error!("Failed to get JavaVM: {}", e);
            return -1;
        }
    };
    let bridge = match env.new_global_ref(bridge) {
        Ok(bridge) => bridge,
        Err(e) => {
            log::error!("Failed to retain bridge: {}", e);
            return -1;
        }
    };

    let mut plugin = NbPlayerPlugin::new(Arc::new(JniEngineFactory { vm, bridge }), config);
    if let Some(release) = android_release(&mut env) {
        plugin = plugin.with_platform_version(format!("Android {}", release));
    }
    let plugin = Arc::new(plugin);
    let previous = PLUGIN.write().replace(plugin);
    if let Some(previous) = previous {
        previous.on_detached();
    }
    log::info!("nbplayer native bridge initialized");
    0
}

#[no_mangle]
pub extern "system" fn Java_com_nbplayer_nbplayer_NativeBridge_nativeDetach(_env: JNIEnv, _class: JClass) {
    let plugin = PLUGIN.write().take();
    if let Some(plugin) = plugin {
        plugin.on_detached();
    }
}

#[no_mangle]
pub extern "system" fn Java_com_nbplayer_nbplayer_NativeBridge_nativeGlobalCall(
    mut env: JNIEnv,
    _class: JClass,
    method: JString,
    args_json: JString,
) -> jstring {
    let result = plugin()
        .and_then(|plugin| parse_call(&mut env, &method, &args_json).map(|call| plugin.on_global_call(&call)))
        .unwrap_or_else(|err| err);
    result_to_jstring(&mut env, &result)
}

#[no_mangle]
pub extern "system" fn Java_com_nbplayer_nbplayer_NativeBridge_nativePlayerCall(
    mut env: JNIEnv,
    _class: JClass,
    player_id: JString,
    method: JString,
    args_json: JString,
) -> jstring {
    let result = match (plugin(), jstring_to_string(&mut env, &player_id)) {
        (Err(err), _) => err,
        (Ok(_), None) => MethodResult::error("INVALID_ARGUMENT", "playerId cannot be null"),
        (Ok(plugin), Some(id)) => match parse_call(&mut env, &method, &args_json) {
            Ok(call) => plugin.on_player_call(&id, &call),
            Err(err) => err,
        },
    };
    result_to_jstring(&mut env, &result)
}

/// Attach a Java sink with a `success(String)` method. Returns 0 on success.
#[no_mangle]
pub extern "system" fn Java_com_nbplayer_nbplayer_NativeBridge_nativeListen(
    mut env: JNIEnv,
    _class: JClass,
    player_id: JString,
    sink: JObject,
) -> jint {
    let (Ok(plugin), Some(id)) = (plugin(), jstring_to_string(&mut env, &player_id)) else {
        return -1;
    };
    let vm = match env.get_java_vm() {
        Ok(vm) => Arc::new(vm),
        Err(e) => {
            log::error!("Failed to get JavaVM: {}", e);
            return -1;
        }
    };
    let sink = match env.new_global_ref(sink) {
        Ok(sink) => sink,
        Err(e) => {
            log::error!("Failed to retain event sink: {}", e);
            return -1;
        }
    };
    match plugin.listen(&id, Arc::new(JniEventSink { vm, sink })) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("listen failed: {}", e);
            -1
        }
    }
}

#[no_mangle]
pub extern "system" fn Java_com_nbplayer_nbplayer_NativeBridge_nativeCancel(
    mut env: JNIEnv,
    _class: JClass,
    player_id: JString,
) {
    if let (Ok(plugin), Some(id)) = (plugin(), jstring_to_string(&mut env, &player_id)) {
        plugin.cancel(&id);
    }
}

/// Engine callback forwarded from the Java wrapper identified by `token`.
#[no_mangle]
pub extern "system" fn Java_com_nbplayer_nbplayer_NativeBridge_nativeOnEngineEvent(
    _env: JNIEnv,
    _class: JClass,
    token: jlong,
    kind: jint,
    what: jint,
    extra: jint,
) {
    let event = match kind {
        EVENT_PREPARED => EngineEvent::Prepared,
        EVENT_COMPLETED => EngineEvent::Completed,
        EVENT_ERROR => EngineEvent::Error { what, extra },
        EVENT_INFO => EngineEvent::Info { what, extra },
        EVENT_SEEK_COMPLETE => EngineEvent::SeekComplete,
        other => {
            log::warn!("Unknown engine event kind {} from engine {}", other, token);
            return;
        }
    };

    let listener = ENGINE_LISTENERS.lock().get(&token).cloned();
    match listener {
        Some(listener) => listener.emit(event),
        None => log::debug!("Event {:?} for released engine {}", event, token),
    }
}
