//! Error types for the SourcePawn runtime.

use thiserror::Error;

/// Human-readable strings for each runtime error code, indexed by `code - 1`.
static ERROR_MESSAGES: [&str; 25] = [
    "Unrecognizable file format",
    "Decompressor was not found",
    "Not enough space on the heap",
    "Invalid parameter or parameter type",
    "Invalid plugin address",
    "Object or index not found",
    "Invalid index or index not found",
    "Not enough space on the stack",
    "Debug section not found or debug not enabled",
    "Invalid instruction",
    "Invalid memory access",
    "Stack went below stack boundary",
    "Heap went below heap boundary",
    "Divide by zero",
    "Array index is out of bounds",
    "Instruction contained invalid parameter",
    "Stack memory leaked by native",
    "Heap memory leaked by native",
    "Dynamic array is too big",
    "Tracker stack is out of bounds",
    "Native is not bound",
    "Maximum number of parameters reached",
    "Native detected error",
    "Plugin not runnable",
    "Call was aborted",
];

/// Errors raised by the runtime and by execution engines.
///
/// The discriminants are the numeric codes shared with engines, natives and
/// host tooling, so they must never be renumbered.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SpError {
    /// File format unrecognized.
    #[error("Unrecognizable file format")]
    FileFormat = 1,
    /// Unknown compression, or the payload failed to inflate.
    #[error("Decompressor was not found")]
    Decompressor = 2,
    /// Not enough space left on the heap.
    #[error("Not enough space on the heap")]
    HeapLow = 3,
    /// Invalid parameter or parameter type.
    #[error("Invalid parameter or parameter type")]
    Param = 4,
    /// A memory address was not valid.
    #[error("Invalid plugin address")]
    InvalidAddress = 5,
    /// The object in question was not found.
    #[error("Object or index not found")]
    NotFound = 6,
    /// Invalid index parameter.
    #[error("Invalid index or index not found")]
    Index = 7,
    /// Not enough space left on the stack.
    #[error("Not enough space on the stack")]
    StackLow = 8,
    /// Debug mode was not on or debug section not found.
    #[error("Debug section not found or debug not enabled")]
    NotDebugging = 9,
    /// Invalid instruction was encountered.
    #[error("Invalid instruction")]
    InvalidInstruction = 10,
    /// Invalid memory access.
    #[error("Invalid memory access")]
    MemAccess = 11,
    /// Stack went beyond its minimum value.
    #[error("Stack went below stack boundary")]
    StackMin = 12,
    /// Heap went beyond its minimum value.
    #[error("Heap went below heap boundary")]
    HeapMin = 13,
    /// Division by zero.
    #[error("Divide by zero")]
    DivideByZero = 14,
    /// Array index is out of bounds.
    #[error("Array index is out of bounds")]
    ArrayBounds = 15,
    /// Instruction had an invalid parameter.
    #[error("Instruction contained invalid parameter")]
    InstructionParam = 16,
    /// A native leaked an item on the stack.
    #[error("Stack memory leaked by native")]
    StackLeak = 17,
    /// A native leaked an item on the heap.
    #[error("Heap memory leaked by native")]
    HeapLeak = 18,
    /// A dynamic array is too big.
    #[error("Dynamic array is too big")]
    ArrayTooBig = 19,
    /// Tracker stack is out of bounds.
    #[error("Tracker stack is out of bounds")]
    TrackerBounds = 20,
    /// Native was pending or invalid.
    #[error("Native is not bound")]
    InvalidNative = 21,
    /// Maximum number of parameters reached.
    #[error("Maximum number of parameters reached")]
    ParamsMax = 22,
    /// Error originates from a native.
    #[error("Native detected error")]
    Native = 23,
    /// Function or plugin is not runnable.
    #[error("Plugin not runnable")]
    NotRunnable = 24,
    /// Function call was aborted.
    #[error("Call was aborted")]
    Aborted = 25,
}

impl SpError {
    const ALL: [SpError; 25] = [
        SpError::FileFormat,
        SpError::Decompressor,
        SpError::HeapLow,
        SpError::Param,
        SpError::InvalidAddress,
        SpError::NotFound,
        SpError::Index,
        SpError::StackLow,
        SpError::NotDebugging,
        SpError::InvalidInstruction,
        SpError::MemAccess,
        SpError::StackMin,
        SpError::HeapMin,
        SpError::DivideByZero,
        SpError::ArrayBounds,
        SpError::InstructionParam,
        SpError::StackLeak,
        SpError::HeapLeak,
        SpError::ArrayTooBig,
        SpError::TrackerBounds,
        SpError::InvalidNative,
        SpError::ParamsMax,
        SpError::Native,
        SpError::NotRunnable,
        SpError::Aborted,
    ];

    /// Numeric wire code of this error.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a numeric code back to an error. `0` (no error) and unknown
    /// codes yield `None`.
    pub fn from_code(code: i32) -> Option<SpError> {
        let index = usize::try_from(code.checked_sub(1)?).ok()?;
        Self::ALL.get(index).copied()
    }

    /// Fixed human-readable description.
    pub fn message(self) -> &'static str {
        ERROR_MESSAGES[(self.code() - 1) as usize]
    }
}

/// Bounds-checked lookup of the message for a raw error code.
pub fn error_message(code: i32) -> Option<&'static str> {
    SpError::from_code(code).map(SpError::message)
}

/// Result type for runtime operations.
pub type SpResult<T> = std::result::Result<T, SpError>;

/// Errors that can occur while loading runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in 1..=25 {
            let err = SpError::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_message_table_bounds() {
        assert_eq!(error_message(0), None);
        assert_eq!(error_message(-3), None);
        assert_eq!(error_message(26), None);
        assert_eq!(error_message(1), Some("Unrecognizable file format"));
        assert_eq!(error_message(25), Some("Call was aborted"));
    }

    #[test]
    fn test_display_matches_table() {
        assert_eq!(SpError::HeapLow.to_string(), "Not enough space on the heap");
        assert_eq!(SpError::InvalidNative.to_string(), "Native is not bound");
        for err in SpError::ALL {
            assert_eq!(err.to_string(), err.message());
        }
    }
}
