//! Script-side support library.
//!
//! This text is compiled into every script as `mod __scriptlink`. It is the
//! only code shared across the FFI boundary, so its `HostVtable` must stay
//! layout-identical to `execute::ffi::HostVtable`.
//!
//! Scripts see `ScriptContext`, `Value`, `Cancelled` and `Unresolved`
//! through a glob import, so their own items of the same name win.

pub const PRELUDE_SOURCE: &str = r##"
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::os::raw::c_void;
use std::time::{Duration, Instant};

pub const STATUS_COMPLETED: i32 = 0;
pub const STATUS_FAULTED: i32 = 1;
pub const STATUS_CANCELLED: i32 = 2;

pub type PushFn = unsafe extern "C" fn(*mut c_void, *const u8, usize);

#[repr(C)]
pub struct HostVtable {
    pub data: *const c_void,
    pub is_cancelled: unsafe extern "C" fn(*const c_void) -> bool,
    pub query: unsafe extern "C" fn(*const c_void, *const u8, usize, *mut c_void, PushFn) -> i32,
    pub emit: unsafe extern "C" fn(*const c_void, i32, *const u8, usize),
}

pub mod prelude {
    pub use super::{Cancelled, ScriptContext, Unresolved, Value};
}

/// Handle to the host for the duration of one invocation.
pub struct ScriptContext {
    vtable: *const HostVtable,
}

impl ScriptContext {
    #[doc(hidden)]
    pub unsafe fn from_raw(vtable: *const HostVtable) -> Self {
        Self { vtable }
    }

    /// True once the host asked this invocation to stop.
    pub fn is_cancelled(&self) -> bool {
        unsafe {
            let vtable = &*self.vtable;
            (vtable.is_cancelled)(vtable.data)
        }
    }

    /// `Err(Cancelled)` once the host asked this invocation to stop.
    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep, waking early with `Err(Cancelled)` if cancellation arrives.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let until = Instant::now() + duration;
        loop {
            self.check_cancelled()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep((until - now).min(Duration::from_millis(10)));
        }
    }

    /// Resolve a host value by name, as JSON text.
    pub fn query(&self, name: &str) -> Option<String> {
        unsafe extern "C" fn push(sink: *mut c_void, ptr: *const u8, len: usize) {
            unsafe {
                let buf = &mut *(sink as *mut Vec<u8>);
                buf.extend_from_slice(std::slice::from_raw_parts(ptr, len));
            }
        }

        let mut buf: Vec<u8> = Vec::new();
        let found = unsafe {
            let vtable = &*self.vtable;
            (vtable.query)(
                vtable.data,
                name.as_ptr(),
                name.len(),
                &mut buf as *mut Vec<u8> as *mut c_void,
                push,
            )
        };
        if found == 0 {
            String::from_utf8(buf).ok()
        } else {
            None
        }
    }

    /// Resolve a host value or fail with `Unresolved`.
    pub fn require(&self, name: &str) -> Result<String, Unresolved> {
        self.query(name).ok_or_else(|| Unresolved(name.to_string()))
    }

    pub fn query_str(&self, name: &str) -> Option<String> {
        unquote(&self.query(name)?)
    }

    pub fn query_i64(&self, name: &str) -> Option<i64> {
        self.query(name)?.trim().parse().ok()
    }

    pub fn query_f64(&self, name: &str) -> Option<f64> {
        self.query(name)?.trim().parse().ok()
    }

    pub fn query_bool(&self, name: &str) -> Option<bool> {
        self.query(name)?.trim().parse().ok()
    }
}

/// Returned by `ScriptContext::check_cancelled` once cancellation arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("execution was cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// A host value the script required could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved(pub String);

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host value `{}` could not be resolved", self.0)
    }
}

impl std::error::Error for Unresolved {}

/// JSON-shaped value a script returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn object<K, V, I>(entries: I) -> Value
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn to_json(&self) -> String {
        let mut out = String::new();
        self.write_json(&mut out);
        out
    }

    fn write_json(&self, out: &mut String) {
        use std::fmt::Write as _;
        match self {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Value::UInt(n) => {
                let _ = write!(out, "{n}");
            }
            Value::Float(f) if f.is_finite() => {
                let _ = write!(out, "{f}");
            }
            Value::Float(_) => out.push_str("null"),
            Value::String(s) => write_escaped(out, s),
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_json(out);
                }
                out.push(']');
            }
            Value::Object(map) => {
                out.push('{');
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_escaped(out, key);
                    out.push(':');
                    value.write_json(out);
                }
                out.push('}');
            }
        }
    }
}

fn write_escaped(out: &mut String, s: &str) {
    use std::fmt::Write as _;
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn unquote(json: &str) -> Option<String> {
    let inner = json.trim().strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            '/' => out.push('/'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let unit = u32::from_str_radix(&hex, 16).ok()?;
                if (0xD800..0xDC00).contains(&unit) {
                    let rest: String = chars.by_ref().take(6).collect();
                    let low = u32::from_str_radix(rest.strip_prefix("\\u")?, 16).ok()?;
                    let code = 0x10000 + ((unit - 0xD800) << 10) + (low.checked_sub(0xDC00)?);
                    out.push(char::from_u32(code)?);
                } else {
                    out.push(char::from_u32(unit)?);
                }
            }
            _ => return None,
        }
    }
    Some(out)
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v as i64)
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, isize, u8, u16, u32);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        if v <= i64::MAX as u64 {
            Value::Int(v as i64)
        } else {
            Value::UInt(v)
        }
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::from(v as u64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::String(v.to_string())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(v: BTreeMap<K, V>) -> Self {
        Value::object(v)
    }
}

impl<K: Into<String>, V: Into<Value>, S> From<HashMap<K, V, S>> for Value {
    fn from(v: HashMap<K, V, S>) -> Self {
        Value::object(v)
    }
}

thread_local! {
    static PANIC_SITE: std::cell::RefCell<Option<String>> = const { std::cell::RefCell::new(None) };
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let mut site = match info.location() {
            Some(loc) => match script_line(loc.file(), loc.line()) {
                Some(line) => format!("   at line {}, column {}", line, loc.column()),
                None => format!("   at {}:{}:{}", loc.file(), loc.line(), loc.column()),
            },
            None => String::from("   at <unknown>"),
        };
        let backtrace = std::backtrace::Backtrace::capture();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            site.push('\n');
            site.push_str(&backtrace.to_string());
        }
        PANIC_SITE.with(|slot| *slot.borrow_mut() = Some(site));
    }));
}

/// Map a location in this generated file onto the script's own lines.
fn script_line(file: &str, line: u32) -> Option<u32> {
    let (start, count) = crate::__SCRIPTLINK_USER_LINES;
    (file == file!() && line >= start && line < start + count).then(|| line - start + 1)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("panic with a non-string payload")
    }
}

fn short_type_name<E>() -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

fn fault(kind: String, message: String, trace: String) -> Value {
    Value::object([
        ("kind", Value::String(kind)),
        ("message", Value::String(message)),
        ("trace", Value::String(trace)),
    ])
}

/// Run the entry point and report its outcome to the host.
#[doc(hidden)]
pub unsafe fn run<F, T, E>(host: *const HostVtable, entry: &str, f: F) -> i32
where
    F: FnOnce(&ScriptContext) -> Result<T, E>,
    T: Into<Value>,
    E: fmt::Display + fmt::Debug,
{
    if host.is_null() {
        return STATUS_FAULTED;
    }
    install_panic_hook();

    let ctx = unsafe { ScriptContext::from_raw(host) };
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        f(&ctx).map(Into::into)
    }));

    let (mut status, value) = match outcome {
        Ok(Ok(value)) => (STATUS_COMPLETED, value),
        Ok(Err(err)) => (
            STATUS_FAULTED,
            fault(
                short_type_name::<E>(),
                err.to_string(),
                format!("   at {entry}: returned Err({err:?})"),
            ),
        ),
        Err(payload) => {
            let site = PANIC_SITE
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_default();
            (
                STATUS_FAULTED,
                fault(String::from("panic"), panic_message(payload.as_ref()), site),
            )
        }
    };

    if status == STATUS_FAULTED && ctx.is_cancelled() {
        status = STATUS_CANCELLED;
    }

    let json = value.to_json();
    unsafe {
        let vtable = &*host;
        (vtable.emit)(vtable.data, status, json.as_ptr(), json.len());
    }
    status
}

/// Drive a future to completion on the current thread.
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    use std::sync::{Arc, Condvar, Mutex};
    use std::task::{Context, Poll, Wake, Waker};

    /// Wake flag guarded by a condvar; no thread handle or thread-local state.
    #[derive(Default)]
    struct Signal {
        woken: Mutex<bool>,
        ready: Condvar,
    }

    impl Signal {
        fn wait(&self) {
            let mut woken = self.woken.lock().unwrap_or_else(|p| p.into_inner());
            while !*woken {
                woken = self.ready.wait(woken).unwrap_or_else(|p| p.into_inner());
            }
            *woken = false;
        }
    }

    impl Wake for Signal {
        fn wake(self: Arc<Self>) {
            self.wake_by_ref();
        }

        fn wake_by_ref(self: &Arc<Self>) {
            *self.woken.lock().unwrap_or_else(|p| p.into_inner()) = true;
            self.ready.notify_one();
        }
    }

    let signal = Arc::new(Signal::default());
    let waker = Waker::from(Arc::clone(&signal));
    let mut future = std::pin::pin!(future);
    let mut cx = Context::from_waker(&waker);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => signal.wait(),
        }
    }
}
"##;
