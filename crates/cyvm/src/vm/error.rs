use crate::compiler::{Pos, Stage};
use thiserror::Error;

/// Lightweight error enum - one byte.
/// The human-readable report is stored on the VM (`Vm::last_error_report`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CyError {
    #[error("token error")]
    Token,
    #[error("parse error")]
    Parse,
    #[error("compile error")]
    Compile,
    #[error("panic")]
    Panic,
    #[error("unknown error")]
    Unknown,
    /// Released a value that is stale or carries no outstanding pin.
    #[error("invalid release")]
    InvalidRelease,
    /// Module handle used outside of its loader callback.
    #[error("invalid module handle")]
    InvalidModuleHandle,
}

pub type CyResult<T> = Result<T, CyError>;

impl From<Stage> for CyError {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Token => CyError::Token,
            Stage::Parse => CyError::Parse,
            Stage::Compile => CyError::Compile,
        }
    }
}

/// Result code exposed at the C boundary. `Success` must stay 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success = 0,
    ErrorToken = 1,
    ErrorParse = 2,
    ErrorCompile = 3,
    ErrorPanic = 4,
    ErrorUnknown = 5,
}

impl From<CyError> for ResultCode {
    fn from(err: CyError) -> Self {
        match err {
            CyError::Token => ResultCode::ErrorToken,
            CyError::Parse => ResultCode::ErrorParse,
            CyError::Compile => ResultCode::ErrorCompile,
            CyError::Panic => ResultCode::ErrorPanic,
            CyError::Unknown | CyError::InvalidRelease | CyError::InvalidModuleHandle => {
                ResultCode::ErrorUnknown
            }
        }
    }
}

impl<T> From<&CyResult<T>> for ResultCode {
    fn from(result: &CyResult<T>) -> Self {
        match result {
            Ok(_) => ResultCode::Success,
            Err(err) => (*err).into(),
        }
    }
}

/// Per-VM diagnostic buffer. Always NUL-terminated so it can be handed to C
/// as a sized string; the terminator is not part of the reported length.
pub(crate) struct ErrorReport {
    buf: String,
}

impl ErrorReport {
    pub fn new() -> Self {
        ErrorReport {
            buf: String::from("\0"),
        }
    }

    pub fn set(&mut self, report: String) {
        self.buf = report;
        self.buf.push('\0');
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.buf.push('\0');
    }

    pub fn as_str(&self) -> &str {
        &self.buf[..self.buf.len() - 1]
    }

    /// Pointer to the first byte; valid until the next `set`/`clear`.
    pub fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.buf.len() - 1
    }
}

fn kind_label(err: CyError) -> &'static str {
    match err {
        CyError::Token => "TokenError",
        CyError::Parse => "ParseError",
        CyError::Compile => "CompileError",
        CyError::Panic => "panic",
        _ => "error",
    }
}

/// Appends `<name>:<line>:<col>:`, the offending source line and a caret.
pub(crate) fn write_location(out: &mut String, source_name: &str, source: &str, pos: Pos) {
    let line_no = pos.line.max(1);
    out.push_str(source_name);
    out.push(':');
    out.push_str(itoa::Buffer::new().format(line_no));
    out.push(':');
    out.push_str(itoa::Buffer::new().format(pos.col.max(1)));
    out.push_str(":\n");

    if let Some(line) = source.lines().nth((line_no - 1) as usize) {
        out.push_str(line);
        out.push('\n');
        for _ in 1..pos.col.max(1) {
            out.push(' ');
        }
        out.push_str("^\n");
    }
}

/// Report for a static (token/parse/compile) failure.
pub(crate) fn format_static_report(
    err: CyError,
    message: &str,
    source_name: &str,
    source: &str,
    pos: Pos,
) -> String {
    let mut out = String::with_capacity(message.len() + 64);
    out.push_str(kind_label(err));
    out.push_str(": ");
    out.push_str(message);
    out.push_str("\n\n");
    write_location(&mut out, source_name, source, pos);
    out
}
