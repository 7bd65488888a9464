use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! internal_error {
    ($msg:expr) => {
        crate::Error::Internal($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Internal(format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into four categories that match the compiler's failure policy:
///
/// # Input errors
/// - [`Error::Malformed`] - Corrupt or inconsistent input bytecode
/// - [`Error::StackShape`] - Operand stack disagreement at a control-flow merge
/// - [`Error::DuplicateType`] - The same type defined by more than one input
/// - [`Error::Empty`] - Empty input program
///
/// Input errors abort the compilation before any optimization begins.
///
/// # Capacity errors
/// - [`Error::FileOverflow`] - A single class exceeds a container index ceiling
/// - [`Error::Capacity`] - The class set does not fit the configured container budget
/// - [`Error::RegisterOverflow`] - A method body needs more registers than the
///   instruction encoding can address
///
/// Capacity errors abort at encoding; no partial container is ever written.
///
/// # Internal consistency errors
/// - [`Error::Internal`] - A compiler-internal invariant was violated (SSA invariant,
///   lens lookup miss for a known element, synthetic name collision that could not be
///   resolved). These are defects in the compiler, not in user input, and abort
///   immediately with full context.
///
/// # Infrastructure errors
/// - [`Error::TypeNotFound`] - A descriptor lookup failed where a definition was required
/// - [`Error::LockError`] - Thread synchronization failure
///
/// # Examples
///
/// ```rust
/// use dexopt::{Error, Result};
///
/// fn report(result: Result<()>) {
///     match result {
///         Ok(()) => {}
///         Err(Error::Malformed { message, file, line }) => {
///             eprintln!("bad input: {} ({}:{})", message, file, line);
///         }
///         Err(Error::FileOverflow { class }) => {
///             eprintln!("{} does not fit a single output container", class);
///         }
///         Err(e) => eprintln!("{}", e),
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input bytecode is damaged and could not be converted to IR.
    ///
    /// The error includes the source location where the malformation was
    /// detected, for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error was raised
        file: &'static str,
        /// The source line in which this error was raised
        line: u32,
    },

    /// Operand stack shapes disagree at a control-flow merge point.
    ///
    /// Raised by the IR builder when two predecessors reach the same block
    /// with different stack heights or incompatible slot types. The message
    /// names the method and the offending block.
    #[error("Inconsistent stack shape - {0}")]
    StackShape(String),

    /// The same type descriptor was defined by more than one input class.
    #[error("Duplicate definition of type {0}")]
    DuplicateType(String),

    /// Provided input program was empty.
    #[error("Provided input program was empty")]
    Empty,

    /// A single class references more distinct items than one output
    /// container can index.
    ///
    /// This is unrecoverable: the class cannot be split, so the compilation
    /// aborts rather than emitting a truncated container.
    #[error("File overflow: class {class} exceeds the per-container index limit on its own")]
    FileOverflow {
        /// Descriptor of the class that does not fit
        class: String,
    },

    /// The final class set does not fit the configured number of output
    /// containers.
    #[error("Capacity exceeded: {category} count {count} over limit {limit}")]
    Capacity {
        /// Index category that overflowed (type/method/field/string)
        category: &'static str,
        /// Number of distinct indices required
        count: usize,
        /// The fixed per-container ceiling
        limit: usize,
    },

    /// A method body requires more instruction registers than the encoding
    /// can address.
    #[error("Method {method} requires {required} registers, limit is {limit}")]
    RegisterOverflow {
        /// The method whose body overflowed
        method: String,
        /// Registers required after lowering
        required: usize,
        /// Addressable register limit
        limit: usize,
    },

    /// Failed to find a required definition for a type descriptor.
    ///
    /// This is the "unexpectedly missing" case: the model claimed to know the
    /// type but no definition exists. Known-missing library members are a
    /// normal lookup outcome and are *not* reported through this variant.
    #[error("Failed to find definition for type {0}")]
    TypeNotFound(String),

    /// A compiler-internal invariant was violated.
    ///
    /// Never user-correctable; the compilation aborts immediately without
    /// attempting to continue over a possibly-corrupt model.
    #[error("Internal compiler error: {0}")]
    Internal(String),

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,
}
