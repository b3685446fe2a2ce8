//! Console output used by the logger and the dump commands.
//!
//! The board registers one [ConsoleSink] early; output written before that is dropped.
#![allow(missing_docs)]

use core::fmt::{Arguments, Write};
use spin::Once;

/// Where console text ends up (a UART, a semihosting channel, a test buffer).
pub trait ConsoleSink: Sync + Send {
    fn put_str(&self, s: &str);
}

static SINK: Once<&'static dyn ConsoleSink> = Once::new();

/// Register the console sink. Only the first call has an effect.
pub fn set_sink(sink: &'static dyn ConsoleSink) {
    SINK.call_once(|| sink);
}

pub fn has_sink() -> bool {
    SINK.get().is_some()
}

/// A [Write] adapter over the registered sink.
pub struct Console;

impl Write for Console {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        if let Some(sink) = SINK.get() {
            sink.put_str(s);
        }
        Ok(())
    }
}

pub fn console_print(args: Arguments) {
    let _ = Console.write_fmt(args);
}

#[macro_export]
/// print string macro
macro_rules! kprint {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::console_print(format_args!($fmt $(, $($arg)+)?));
    }
}

#[macro_export]
macro_rules! kprintln {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::console_print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?));
    }
}
