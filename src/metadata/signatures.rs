//! Signature blob parsing (ECMA-335 II.23.2).
//!
//! Field, method and type-spec signatures are stored in the `#Blob` heap as compact
//! type trees. The parser here produces [`RawType`] trees whose leaves still carry
//! compressed metadata tokens; the loader resolves those tokens into named type
//! references when it builds the descriptor graph.

use crate::{file::parser::Parser, metadata::token::CodedToken, Error::RecursionLimit, Result};

/// Maximum recursion depth for signature parsing.
const MAX_RECURSION_DEPTH: usize = 50;

/// `ELEMENT_TYPE` constants (ECMA-335 II.23.1.16).
#[allow(missing_docs, non_snake_case)]
pub mod ELEMENT_TYPE {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const PTR: u8 = 0x0F;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1B;
    pub const OBJECT: u8 = 0x1C;
    pub const SZARRAY: u8 = 0x1D;
    pub const MVAR: u8 = 0x1E;
    pub const CMOD_REQD: u8 = 0x1F;
    pub const CMOD_OPT: u8 = 0x20;
}

/// A type tree as encoded in a signature blob, with unresolved token leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawType {
    /// `void` (return types only)
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    I1,
    /// `System.Byte`
    U1,
    /// `System.Int16`
    I2,
    /// `System.UInt16`
    U2,
    /// `System.Int32`
    I4,
    /// `System.UInt32`
    U4,
    /// `System.Int64`
    I8,
    /// `System.UInt64`
    U8,
    /// `System.Single`
    R4,
    /// `System.Double`
    R8,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// `System.IntPtr`
    I,
    /// `System.UIntPtr`
    U,
    /// Unmanaged pointer
    Ptr(Box<RawType>),
    /// Managed by-reference
    ByRef(Box<RawType>),
    /// Named value type
    ValueType(CodedToken),
    /// Named reference type
    Class(CodedToken),
    /// Generic parameter of the declaring type, by ordinal
    Var(u32),
    /// Generic parameter of the declaring method, by ordinal
    MVar(u32),
    /// Multi-dimensional array
    Array {
        /// Element type
        element: Box<RawType>,
        /// Number of dimensions
        rank: u32,
    },
    /// Single-dimensional, zero-based array
    SzArray(Box<RawType>),
    /// Instantiated generic type
    GenericInst {
        /// The open type being instantiated
        base: Box<RawType>,
        /// Type arguments in declaration order
        args: Vec<RawType>,
    },
    /// Function pointer (signature consumed and discarded)
    FnPtr,
    /// `System.TypedReference`
    TypedByRef,
}

/// A parameter or return type: the base type plus a by-ref marker.
#[derive(Debug, Clone)]
pub struct ParamSig {
    /// `true` for `ref`/`out` parameters.
    pub by_ref: bool,
    /// The parameter's type.
    pub base: RawType,
}

/// A parsed field signature.
#[derive(Debug, Clone)]
pub struct FieldSig {
    /// The field's type.
    pub field_type: RawType,
}

/// A parsed method-def signature.
#[derive(Debug, Clone)]
pub struct MethodSig {
    /// `true` when the method has a `this` parameter (instance method).
    pub has_this: bool,
    /// Number of generic parameters declared by the method itself.
    pub generic_param_count: u32,
    /// Return type.
    pub return_type: ParamSig,
    /// Parameter types in declaration order.
    pub params: Vec<ParamSig>,
}

/// Signature parser over one blob. Do not reuse an instance for multiple signatures.
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> SignatureParser<'a> {
    /// Creates a parser over the blob `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
        }
    }

    fn parse_type(&mut self) -> Result<RawType> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let result = self.parse_type_inner();
        self.depth -= 1;
        result
    }

    fn parse_type_inner(&mut self) -> Result<RawType> {
        let current_byte = self.parser.read_le::<u8>()?;
        match current_byte {
            ELEMENT_TYPE::VOID => Ok(RawType::Void),
            ELEMENT_TYPE::BOOLEAN => Ok(RawType::Boolean),
            ELEMENT_TYPE::CHAR => Ok(RawType::Char),
            ELEMENT_TYPE::I1 => Ok(RawType::I1),
            ELEMENT_TYPE::U1 => Ok(RawType::U1),
            ELEMENT_TYPE::I2 => Ok(RawType::I2),
            ELEMENT_TYPE::U2 => Ok(RawType::U2),
            ELEMENT_TYPE::I4 => Ok(RawType::I4),
            ELEMENT_TYPE::U4 => Ok(RawType::U4),
            ELEMENT_TYPE::I8 => Ok(RawType::I8),
            ELEMENT_TYPE::U8 => Ok(RawType::U8),
            ELEMENT_TYPE::R4 => Ok(RawType::R4),
            ELEMENT_TYPE::R8 => Ok(RawType::R8),
            ELEMENT_TYPE::STRING => Ok(RawType::String),
            ELEMENT_TYPE::OBJECT => Ok(RawType::Object),
            ELEMENT_TYPE::I => Ok(RawType::I),
            ELEMENT_TYPE::U => Ok(RawType::U),
            ELEMENT_TYPE::TYPEDBYREF => Ok(RawType::TypedByRef),
            ELEMENT_TYPE::PTR => {
                self.skip_custom_mods()?;
                Ok(RawType::Ptr(Box::new(self.parse_type()?)))
            }
            ELEMENT_TYPE::BYREF => Ok(RawType::ByRef(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::VALUETYPE => {
                Ok(RawType::ValueType(self.parser.read_compressed_token()?))
            }
            ELEMENT_TYPE::CLASS => Ok(RawType::Class(self.parser.read_compressed_token()?)),
            ELEMENT_TYPE::VAR => Ok(RawType::Var(self.parser.read_compressed_uint()?)),
            ELEMENT_TYPE::MVAR => Ok(RawType::MVar(self.parser.read_compressed_uint()?)),
            ELEMENT_TYPE::SZARRAY => {
                self.skip_custom_mods()?;
                Ok(RawType::SzArray(Box::new(self.parse_type()?)))
            }
            ELEMENT_TYPE::ARRAY => {
                let element = self.parse_type()?;
                let rank = self.parser.read_compressed_uint()?;

                let num_sizes = self.parser.read_compressed_uint()?;
                for _ in 0..num_sizes {
                    let _size = self.parser.read_compressed_uint()?;
                }
                let num_lo_bounds = self.parser.read_compressed_uint()?;
                for _ in 0..num_lo_bounds {
                    let _bound = self.parser.read_compressed_uint()?;
                }

                Ok(RawType::Array {
                    element: Box::new(element),
                    rank,
                })
            }
            ELEMENT_TYPE::GENERICINST => {
                let peek_byte = self.parser.peek_byte()?;
                if peek_byte != ELEMENT_TYPE::CLASS && peek_byte != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not CLASS or VALUETYPE - {}",
                        peek_byte
                    ));
                }

                let base = self.parse_type()?;
                let arg_count = self.parser.read_compressed_uint()?;
                let mut args = Vec::with_capacity(arg_count as usize);
                for _ in 0..arg_count {
                    args.push(self.parse_type()?);
                }

                Ok(RawType::GenericInst {
                    base: Box::new(base),
                    args,
                })
            }
            ELEMENT_TYPE::FNPTR => {
                // Consume the nested method signature; the shape is unsupported
                // downstream so only the token stream position matters.
                let _ = self.parse_method_signature()?;
                Ok(RawType::FnPtr)
            }
            _ => Err(malformed_error!(
                "Unsupported ELEMENT_TYPE - {}",
                current_byte
            )),
        }
    }

    /// Skips any custom modifiers (`CMOD_OPT` / `CMOD_REQD`) at the current position.
    fn skip_custom_mods(&mut self) -> Result<()> {
        while self.parser.has_more_data() {
            let next_byte = self.parser.peek_byte()?;
            if next_byte != ELEMENT_TYPE::CMOD_OPT && next_byte != ELEMENT_TYPE::CMOD_REQD {
                break;
            }

            self.parser.advance()?;
            let _token = self.parser.read_compressed_token()?;
        }

        Ok(())
    }

    fn parse_param(&mut self) -> Result<ParamSig> {
        self.skip_custom_mods()?;

        let mut by_ref = false;
        if self.parser.has_more_data() && self.parser.peek_byte()? == ELEMENT_TYPE::BYREF {
            self.parser.advance()?;
            by_ref = true;
        }

        Ok(ParamSig {
            by_ref,
            base: self.parse_type()?,
        })
    }

    /// Parses a `MethodDefSig`.
    ///
    /// # Errors
    /// Returns an error for malformed or truncated signature data.
    pub fn parse_method_signature(&mut self) -> Result<MethodSig> {
        let convention_byte = self.parser.read_le::<u8>()?;

        let generic_param_count = if convention_byte & 0x10 != 0 {
            self.parser.read_compressed_uint()?
        } else {
            0
        };
        let param_count = self.parser.read_compressed_uint()?;
        let return_type = self.parse_param()?;

        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            params.push(self.parse_param()?);
        }

        Ok(MethodSig {
            has_this: convention_byte & 0x20 != 0,
            generic_param_count,
            return_type,
            params,
        })
    }

    /// Parses a `FieldSig` (II.23.2.4).
    ///
    /// # Errors
    /// Returns an error if the header byte is not the field calling convention or the
    /// type cannot be parsed.
    pub fn parse_field_signature(&mut self) -> Result<FieldSig> {
        let header = self.parser.read_le::<u8>()?;
        if header != 0x06 {
            return Err(malformed_error!(
                "Invalid field signature header - {}",
                header
            ));
        }

        self.skip_custom_mods()?;
        Ok(FieldSig {
            field_type: self.parse_type()?,
        })
    }

    /// Parses a `TypeSpec` signature: a single encoded type.
    ///
    /// # Errors
    /// Returns an error for malformed or truncated signature data.
    pub fn parse_type_spec_signature(&mut self) -> Result<RawType> {
        self.parse_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::CodedTokenTable;

    #[test]
    fn field_of_int32() {
        let mut parser = SignatureParser::new(&[0x06, 0x08]);
        let sig = parser.parse_field_signature().unwrap();
        assert_eq!(sig.field_type, RawType::I4);
    }

    #[test]
    fn static_method_two_int32_params() {
        // default convention, 2 params, returns I4, takes (I4, I4)
        let mut parser = SignatureParser::new(&[0x00, 0x02, 0x08, 0x08, 0x08]);
        let sig = parser.parse_method_signature().unwrap();
        assert!(!sig.has_this);
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.return_type.base, RawType::I4);
    }

    #[test]
    fn instance_method_with_byref_param() {
        // HASTHIS, 1 param, void return, ref I4
        let mut parser = SignatureParser::new(&[0x20, 0x01, 0x01, 0x10, 0x08]);
        let sig = parser.parse_method_signature().unwrap();
        assert!(sig.has_this);
        assert!(sig.params[0].by_ref);
        assert_eq!(sig.params[0].base, RawType::I4);
    }

    #[test]
    fn generic_instantiation() {
        // GENERICINST CLASS token(TypeRef row 3) <String>
        let mut parser = SignatureParser::new(&[0x15, 0x12, 0x0D, 0x01, 0x0E]);
        let spec = parser.parse_type_spec_signature().unwrap();
        match spec {
            RawType::GenericInst { base, args } => {
                match *base {
                    RawType::Class(token) => {
                        assert_eq!(token.table, CodedTokenTable::TypeRef);
                        assert_eq!(token.row, 3);
                    }
                    other => panic!("unexpected base {other:?}"),
                }
                assert_eq!(args, vec![RawType::String]);
            }
            other => panic!("unexpected type {other:?}"),
        }
    }

    #[test]
    fn szarray_of_string() {
        let mut parser = SignatureParser::new(&[0x06, 0x1D, 0x0E]);
        let sig = parser.parse_field_signature().unwrap();
        assert_eq!(sig.field_type, RawType::SzArray(Box::new(RawType::String)));
    }
}
