//! Calling convention of compiled script methods.
//!
//! Hooks and runnable bodies are plain `extern "C" fn()`. Methods take their
//! arguments as length-prefixed UTF-8 fields (a little-endian `u32` length,
//! then the value's text) and hand their result back through a host-provided
//! write callback, as one tag byte followed by the value's text. The guest
//! never returns memory the host would have to free.
//!
//! [`GUEST_PRELUDE`] is the guest half, compiled into every script library.

use std::any::Any;
use std::ffi::c_void;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{Error, Result};

pub(crate) const STATUS_OK: i32 = 0;
pub(crate) const STATUS_BAD_ARGS: i32 = -1;
pub(crate) const STATUS_PANICKED: i32 = -2;

/// Receives the guest's result bytes.
pub(crate) type WriteFn = unsafe extern "C" fn(*mut c_void, *const u8, usize);

/// `(args_ptr, args_len, sink, write) -> status`
pub(crate) type MethodEntry = unsafe extern "C" fn(*const u8, usize, *mut c_void, WriteFn) -> i32;

/// Guest side of the convention, emitted once per generated library.
pub(crate) const GUEST_PRELUDE: &str = r#"mod __al_abi {
    pub type Write = unsafe extern "C" fn(*mut std::ffi::c_void, *const u8, usize);

    pub fn split(mut bytes: &[u8]) -> Option<Vec<&str>> {
        let mut fields = Vec::new();
        while !bytes.is_empty() {
            let len = u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?) as usize;
            let field = bytes.get(4..4 + len)?;
            fields.push(std::str::from_utf8(field).ok()?);
            bytes = &bytes[4 + len..];
        }
        Some(fields)
    }

    pub trait Decode: Sized {
        fn decode(field: &str) -> Option<Self>;
    }

    macro_rules! decode_parsed {
        ($($t:ty),*) => {$(
            impl Decode for $t {
                fn decode(field: &str) -> Option<Self> {
                    field.parse().ok()
                }
            }
        )*};
    }
    decode_parsed!(bool, char, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, String);

    pub trait Encode {
        fn encode(self) -> Vec<u8>;
    }

    fn tagged(tag: u8, text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() + 1);
        out.push(tag);
        out.extend_from_slice(text.as_bytes());
        out
    }

    impl Encode for () {
        fn encode(self) -> Vec<u8> {
            vec![b'u']
        }
    }

    macro_rules! encode_display {
        ($($t:ty => $tag:expr),*) => {$(
            impl Encode for $t {
                fn encode(self) -> Vec<u8> {
                    tagged($tag, &self.to_string())
                }
            }
        )*};
    }
    encode_display!(bool => b'z', char => b'c', i32 => b'i', i64 => b'l', f32 => b'f', f64 => b'd', String => b's');
}
"#;

/// Text of one argument, if its type can cross the boundary.
fn field(arg: &dyn Any) -> Option<String> {
    macro_rules! display_as {
        ($($t:ty),*) => {$(
            if let Some(value) = arg.downcast_ref::<$t>() {
                return Some(value.to_string());
            }
        )*};
    }
    display_as!(
        i32,
        i64,
        bool,
        char,
        String,
        &'static str,
        f64,
        f32,
        i8,
        i16,
        u8,
        u16,
        u32,
        u64
    );
    None
}

pub(crate) fn encode_args(args: &[&dyn Any]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (index, arg) in args.iter().enumerate() {
        let text = field(*arg).ok_or_else(|| {
            Error::InvalidInput(format!("argument {} has a type scripts can't receive", index))
        })?;
        let len = u32::try_from(text.len())
            .map_err(|_| Error::InvalidInput(format!("argument {} is too long", index)))?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(text.as_bytes());
    }
    Ok(out)
}

fn parsed<T>(text: &str) -> Result<Box<dyn Any>>
where
    T: FromStr + 'static,
    T::Err: Display,
{
    text.parse::<T>()
        .map(|value| Box::new(value) as Box<dyn Any>)
        .map_err(|e| Error::ScriptCall(format!("bad result {:?}: {}", text, e)))
}

/// Decode a tagged result into the value type of its
/// [`ReturnType`](super::class::ReturnType).
pub(crate) fn decode_return(bytes: &[u8]) -> Result<Box<dyn Any>> {
    let (&tag, text) = bytes
        .split_first()
        .ok_or_else(|| Error::ScriptCall("no result written".to_string()))?;
    let text = std::str::from_utf8(text).map_err(|e| Error::ScriptCall(e.to_string()))?;
    match tag {
        b'u' => Ok(Box::new(())),
        b'z' => parsed::<bool>(text),
        b'c' => parsed::<char>(text),
        b'i' => parsed::<i32>(text),
        b'l' => parsed::<i64>(text),
        b'f' => parsed::<f32>(text),
        b'd' => parsed::<f64>(text),
        b's' => Ok(Box::new(text.to_string())),
        other => Err(Error::ScriptCall(format!("unknown result tag {}", other))),
    }
}

unsafe extern "C" fn write_output(sink: *mut c_void, ptr: *const u8, len: usize) {
    // Safety: `sink` is the buffer handed out by `call`, and the guest keeps
    // `ptr..ptr + len` alive for the duration of this callback.
    unsafe {
        let output = &mut *sink.cast::<Vec<u8>>();
        output.extend_from_slice(std::slice::from_raw_parts(ptr, len));
    }
}

/// Call a method entry point.
///
/// # Safety
///
/// `entry` must implement this convention and stay mapped during the call.
pub(crate) unsafe fn call(entry: MethodEntry, args: &[&dyn Any]) -> Result<Box<dyn Any>> {
    let encoded = encode_args(args)?;
    let mut output: Vec<u8> = Vec::new();
    let sink = (&mut output as *mut Vec<u8>).cast::<c_void>();
    let status = unsafe { entry(encoded.as_ptr(), encoded.len(), sink, write_output) };
    match status {
        STATUS_OK => decode_return(&output),
        STATUS_BAD_ARGS => Err(Error::ScriptCall(
            "arguments don't match the function signature".to_string(),
        )),
        STATUS_PANICKED => Err(Error::ScriptCall("script function panicked".to_string())),
        other => Err(Error::ScriptCall(format!("unexpected status {}", other))),
    }
}
