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

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Failures fall in two tiers. Everything represented here is *fatal*: the run stops and no
/// staged output is published. Unsupported type shapes (open generics, arrays, by-ref
/// parameters, delegate members) are deliberately **not** errors - the generator lowers them
/// to placeholder types or skipped members with a reason comment, so the produced modules
/// always compile and document their own gaps.
///
/// # Error Categories
///
/// ## File Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond file boundaries
/// - [`Error::NotSupported`] - Unsupported file format or feature
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
///
/// ## Configuration Errors
/// - [`Error::ConfigParse`] - Malformed directive file (includes file and line)
/// - [`Error::ConfigStaleType`] - A configured type does not exist in its assembly
///
/// ## Generation Errors
/// - [`Error::AssemblyNotFound`] - An assembly reference could not be resolved to a file
/// - [`Error::NamespaceCaseCollision`] - Two namespaces differ only by letter case
/// - [`Error::GenericContext`] - A generic parameter was referenced outside its scope
/// - [`Error::Invariant`] - An internal consistency violation (programming fault)
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// The file structure does not conform to the expected .NET PE format. The error
    /// includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    ///
    /// The input is not a supported .NET PE executable, or uses metadata features that
    /// this generator does not read.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Recursion limit reached.
    ///
    /// Signature type trees are recursive; a depth cap protects against crafted blobs.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Malformed configuration file.
    ///
    /// Carries the configuration file name and the 1-based line number of the offending
    /// directive, matching the `file(line N): message` shape users see.
    #[error("{file}(line {line}): {message}")]
    ConfigParse {
        /// The configuration file that failed to parse
        file: String,
        /// 1-based line number of the offending directive
        line: u32,
        /// What was wrong with it
        message: String,
    },

    /// A configured type does not exist in its assembly.
    ///
    /// Guards against stale configuration: every `Type` directive must name a type that is
    /// actually present in the assembly it is scoped to.
    #[error("{file}(line {line}): type '{type_name}' does not exist in assembly '{assembly}'")]
    ConfigStaleType {
        /// The configuration file the directive came from
        file: String,
        /// 1-based line of the `Type` directive
        line: u32,
        /// The configured type name
        type_name: String,
        /// The assembly it was scoped to
        assembly: String,
    },

    /// An assembly reference could not be resolved to a file on disk.
    #[error("assembly '{0}' could not be found in the search paths")]
    AssemblyNotFound(String),

    /// Two namespaces differ only by letter case.
    ///
    /// Case-insensitive file systems cannot host both namespaces as separate module paths,
    /// so this is a hard error rather than something resolved automatically.
    #[error("namespaces '{0}' and '{1}' differ only by letter case and cannot both be generated")]
    NamespaceCaseCollision(String, String),

    /// A generic type parameter was referenced outside of its declaring scope.
    ///
    /// This signals a code-generation bug (the emitter lost track of the in-scope
    /// parameter set), not bad input data.
    #[error("generic parameter '{0}' referenced outside its declaring scope")]
    GenericContext(String),

    /// An internal consistency violation.
    ///
    /// Used for programming-invariant faults such as an enum with more than one instance
    /// field, an interface with declared fields, or an assembly generation state that is
    /// re-entered out of order. Generation must stop immediately rather than produce
    /// subtly wrong output.
    #[error("internal consistency violation: {0}")]
    Invariant(String),
}
