//! Container decoding, for round-trip verification.
//!
//! The decoder checks the magic, version and payload checksum, then
//! rebuilds the class set against a fresh set of interning pools. Every
//! pool index in the bytes is bounds-checked; a bad index or a short
//! buffer is an input error with the offending position, never a panic.

use std::{collections::HashMap, sync::Arc};

use sha1::{Digest, Sha1};

use crate::{
    bytecode::{BinaryOp, IfCond, InvokeKind},
    model::{
        ClassDef, ClassFlags, ConstValue, FieldDef, FieldFlags, FieldRef, MethodDef, MethodFlags,
        MethodRef, Pools, Proto, StringId, Type,
    },
    Result,
};

use super::{
    io::{read_bytes, read_i32, read_u16, read_u32, read_u8},
    writer::{opcode, HEADER_LEN, MAGIC, VERSION},
    LoweredHandler, LoweredMethod, RegOp,
};

/// A decoded container: the class set against its own interning pools.
#[derive(Debug)]
pub struct DecodedContainer {
    /// Pools the decoded references are interned into.
    pub pools: Arc<Pools>,
    /// Decoded class definitions, in container order. Bodies live in
    /// [`DecodedContainer::codes`]; the stack-form `code` slot stays empty.
    pub classes: Vec<ClassDef>,
    /// Register bodies by method reference.
    pub codes: HashMap<MethodRef, LoweredMethod>,
}

/// Decodes one container.
///
/// # Errors
///
/// [`crate::Error::Malformed`] on a bad magic, unsupported version,
/// checksum mismatch, out-of-range pool index or truncated buffer.
pub fn read_container(bytes: &[u8]) -> Result<DecodedContainer> {
    if bytes.len() < HEADER_LEN {
        return Err(malformed_error!(
            "container of {} bytes is shorter than the header",
            bytes.len()
        ));
    }
    let mut offset = 0;
    let magic = read_bytes(bytes, &mut offset, 4)?;
    if magic != MAGIC {
        return Err(malformed_error!("bad container magic {magic:02X?}"));
    }
    let version = read_u16(bytes, &mut offset)?;
    if version != VERSION {
        return Err(malformed_error!("unsupported container version {version}"));
    }
    let _reserved = read_u16(bytes, &mut offset)?;
    let checksum = read_bytes(bytes, &mut offset, 20)?.to_vec();

    let string_count = read_u32(bytes, &mut offset)? as usize;
    let type_count = read_u32(bytes, &mut offset)? as usize;
    let proto_count = read_u32(bytes, &mut offset)? as usize;
    let field_count = read_u32(bytes, &mut offset)? as usize;
    let method_count = read_u32(bytes, &mut offset)? as usize;
    let class_count = read_u32(bytes, &mut offset)? as usize;

    let digest = Sha1::digest(&bytes[HEADER_LEN..]);
    if digest.as_slice() != checksum {
        return Err(malformed_error!("container checksum mismatch"));
    }

    let pools = Pools::new();
    let mut decoder = Decoder {
        bytes,
        offset,
        pools: &pools,
        strings: Vec::with_capacity(string_count),
        string_content: Vec::with_capacity(string_count),
        types: Vec::with_capacity(type_count),
        protos: Vec::with_capacity(proto_count),
        fields: Vec::with_capacity(field_count),
        methods: Vec::with_capacity(method_count),
    };

    decoder.read_strings(string_count)?;
    decoder.read_types(type_count)?;
    decoder.read_protos(proto_count)?;
    decoder.read_fields(field_count)?;
    decoder.read_methods(method_count)?;

    let mut classes = Vec::with_capacity(class_count);
    let mut codes = HashMap::new();
    for _ in 0..class_count {
        let class = decoder.read_class(&mut codes)?;
        classes.push(class);
    }
    if decoder.offset != bytes.len() {
        return Err(malformed_error!(
            "{} trailing bytes after the last class",
            bytes.len() - decoder.offset
        ));
    }

    Ok(DecodedContainer {
        pools,
        classes,
        codes,
    })
}

const NONE_U16: u16 = 0xFFFF;

struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
    pools: &'a Pools,
    strings: Vec<StringId>,
    string_content: Vec<String>,
    types: Vec<Type>,
    protos: Vec<Proto>,
    fields: Vec<FieldRef>,
    methods: Vec<MethodRef>,
}

impl Decoder<'_> {
    fn u8(&mut self) -> Result<u8> {
        read_u8(self.bytes, &mut self.offset)
    }

    fn u16(&mut self) -> Result<u16> {
        read_u16(self.bytes, &mut self.offset)
    }

    fn u32(&mut self) -> Result<u32> {
        read_u32(self.bytes, &mut self.offset)
    }

    fn i32(&mut self) -> Result<i32> {
        read_i32(self.bytes, &mut self.offset)
    }

    fn read_strings(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let len = self.u32()? as usize;
            let content = read_bytes(self.bytes, &mut self.offset, len)?;
            let content = std::str::from_utf8(content)
                .map_err(|_| malformed_error!("string entry is not valid UTF-8"))?
                .to_owned();
            self.strings.push(self.pools.strings.intern(&content));
            self.string_content.push(content);
        }
        Ok(())
    }

    fn string_at(&self, index: u32) -> Result<&str> {
        self.string_content
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| malformed_error!("string index {index} out of range"))
    }

    fn read_types(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let descriptor_index = self.u32()?;
            let descriptor = self.string_at(descriptor_index)?.to_owned();
            self.types.push(self.pools.types.intern(&descriptor)?);
        }
        Ok(())
    }

    fn type_at(&self, index: u16) -> Result<Type> {
        self.types
            .get(index as usize)
            .copied()
            .ok_or_else(|| malformed_error!("type index {index} out of range"))
    }

    fn read_protos(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let return_index = self.u16()?;
            let return_type = self.type_at(return_index)?;
            let param_count = self.u32()? as usize;
            let mut parameters = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                let index = self.u16()?;
                parameters.push(self.type_at(index)?);
            }
            self.protos
                .push(self.pools.protos.intern(return_type, &parameters, &self.pools.types));
        }
        Ok(())
    }

    fn proto_at(&self, index: u16) -> Result<Proto> {
        self.protos
            .get(index as usize)
            .copied()
            .ok_or_else(|| malformed_error!("proto index {index} out of range"))
    }

    fn read_fields(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let holder_index = self.u16()?;
            let holder = self.type_at(holder_index)?;
            let name_index = self.u32()?;
            let name = self.decoded_string(name_index)?;
            let type_index = self.u16()?;
            let ty = self.type_at(type_index)?;
            self.fields.push(self.pools.members.field(holder, name, ty));
        }
        Ok(())
    }

    fn field_at(&self, index: u16) -> Result<FieldRef> {
        self.fields
            .get(index as usize)
            .copied()
            .ok_or_else(|| malformed_error!("field index {index} out of range"))
    }

    fn read_methods(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let holder_index = self.u16()?;
            let holder = self.type_at(holder_index)?;
            let name_index = self.u32()?;
            let name = self.decoded_string(name_index)?;
            let proto_index = self.u16()?;
            let proto = self.proto_at(proto_index)?;
            self.methods
                .push(self.pools.members.method(holder, name, proto));
        }
        Ok(())
    }

    fn method_at(&self, index: u16) -> Result<MethodRef> {
        self.methods
            .get(index as usize)
            .copied()
            .ok_or_else(|| malformed_error!("method index {index} out of range"))
    }

    fn read_class(&mut self, codes: &mut HashMap<MethodRef, LoweredMethod>) -> Result<ClassDef> {
        let type_index = self.u16()?;
        let ty = self.type_at(type_index)?;
        let flags = ClassFlags::from_bits(self.u32()?)
            .ok_or_else(|| malformed_error!("unknown class flag bits"))?;
        let superclass = match self.u16()? {
            NONE_U16 => None,
            index => Some(self.type_at(index)?),
        };
        let mut class = ClassDef::new(ty, flags, superclass);

        let interface_count = self.u32()? as usize;
        for _ in 0..interface_count {
            let index = self.u16()?;
            class.interfaces.push(self.type_at(index)?);
        }

        let field_count = self.u32()? as usize;
        for _ in 0..field_count {
            let field_index = self.u16()?;
            let reference = self.field_at(field_index)?;
            let flags = FieldFlags::from_bits(self.u32()?)
                .ok_or_else(|| malformed_error!("unknown field flag bits"))?;
            let static_value = match self.u8()? {
                0 => None,
                1 => Some(ConstValue::Int(self.i32()?)),
                2 => {
                    let index = self.u32()?;
                    Some(ConstValue::String(self.decoded_string(index)?))
                }
                3 => Some(ConstValue::Null),
                tag => return Err(malformed_error!("unknown constant value tag {tag}")),
            };
            class.fields.push(FieldDef {
                reference,
                flags,
                static_value,
            });
        }

        let method_count = self.u32()? as usize;
        for _ in 0..method_count {
            let method_index = self.u16()?;
            let reference = self.method_at(method_index)?;
            let flags = MethodFlags::from_bits(self.u32()?)
                .ok_or_else(|| malformed_error!("unknown method flag bits"))?;
            if self.u8()? == 1 {
                let body = self.read_code()?;
                codes.insert(reference, body);
            }
            class.methods.push(MethodDef {
                reference,
                flags,
                code: None,
            });
        }
        Ok(class)
    }

    fn read_code(&mut self) -> Result<LoweredMethod> {
        let registers = self.u16()?;
        let op_count = self.u32()? as usize;
        let mut ops = Vec::with_capacity(op_count);
        for _ in 0..op_count {
            ops.push(self.read_op()?);
        }
        let handler_count = self.u32()? as usize;
        let mut handlers = Vec::with_capacity(handler_count);
        for _ in 0..handler_count {
            let start = self.u32()?;
            let end = self.u32()?;
            let handler = self.u32()?;
            let catch_type = match self.u16()? {
                NONE_U16 => None,
                index => Some(self.type_at(index)?),
            };
            handlers.push(LoweredHandler {
                start,
                end,
                handler,
                catch_type,
            });
        }
        Ok(LoweredMethod {
            registers,
            ops,
            handlers,
        })
    }

    #[allow(clippy::too_many_lines)]
    fn read_op(&mut self) -> Result<RegOp> {
        let op = match self.u8()? {
            opcode::CONST => RegOp::Const {
                dest: self.u16()?,
                value: self.i32()?,
            },
            opcode::CONST_STRING => {
                let dest = self.u16()?;
                let index = u32::from(self.u16()?);
                RegOp::ConstString {
                    dest,
                    string: self.decoded_string(index)?,
                }
            }
            opcode::CONST_STRING_JUMBO => {
                let dest = self.u16()?;
                let index = self.u32()?;
                RegOp::ConstString {
                    dest,
                    string: self.decoded_string(index)?,
                }
            }
            opcode::CONST_NULL => RegOp::ConstNull { dest: self.u16()? },
            opcode::MOVE => RegOp::Move {
                dest: self.u16()?,
                src: self.u16()?,
            },
            opcode::NEG => RegOp::Neg {
                dest: self.u16()?,
                src: self.u16()?,
            },
            opcode::BINARY => RegOp::Binary {
                op: decode_binary_op(self.u8()?)?,
                dest: self.u16()?,
                lhs: self.u16()?,
                rhs: self.u16()?,
            },
            opcode::ARRAY_GET => RegOp::ArrayGet {
                dest: self.u16()?,
                array: self.u16()?,
                index: self.u16()?,
            },
            opcode::ARRAY_PUT => RegOp::ArrayPut {
                array: self.u16()?,
                index: self.u16()?,
                value: self.u16()?,
            },
            opcode::ARRAY_LENGTH => RegOp::ArrayLength {
                dest: self.u16()?,
                array: self.u16()?,
            },
            opcode::NEW_INSTANCE => RegOp::NewInstance {
                dest: self.u16()?,
                ty: {
                    let index = self.u16()?;
                    self.type_at(index)?
                },
            },
            opcode::NEW_ARRAY => RegOp::NewArray {
                dest: self.u16()?,
                ty: {
                    let index = self.u16()?;
                    self.type_at(index)?
                },
                length: self.u16()?,
            },
            opcode::CHECK_CAST => RegOp::CheckCast {
                dest: self.u16()?,
                src: self.u16()?,
                ty: {
                    let index = self.u16()?;
                    self.type_at(index)?
                },
            },
            opcode::INSTANCE_OF => RegOp::InstanceOf {
                dest: self.u16()?,
                src: self.u16()?,
                ty: {
                    let index = self.u16()?;
                    self.type_at(index)?
                },
            },
            opcode::STATIC_GET => RegOp::StaticGet {
                dest: self.u16()?,
                field: {
                    let index = self.u16()?;
                    self.field_at(index)?
                },
            },
            opcode::STATIC_PUT => RegOp::StaticPut {
                field: {
                    let index = self.u16()?;
                    self.field_at(index)?
                },
                value: self.u16()?,
            },
            opcode::INSTANCE_GET => RegOp::InstanceGet {
                dest: self.u16()?,
                field: {
                    let index = self.u16()?;
                    self.field_at(index)?
                },
                object: self.u16()?,
            },
            opcode::INSTANCE_PUT => RegOp::InstancePut {
                field: {
                    let index = self.u16()?;
                    self.field_at(index)?
                },
                object: self.u16()?,
                value: self.u16()?,
            },
            opcode::INVOKE => {
                let kind = decode_invoke_kind(self.u8()?)?;
                let method = {
                    let index = self.u16()?;
                    self.method_at(index)?
                };
                let argc = self.u8()? as usize;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(self.u16()?);
                }
                RegOp::Invoke { kind, method, args }
            }
            opcode::MOVE_RESULT => RegOp::MoveResult { dest: self.u16()? },
            opcode::MOVE_EXCEPTION => RegOp::MoveException { dest: self.u16()? },
            opcode::MONITOR_ENTER => RegOp::MonitorEnter {
                object: self.u16()?,
            },
            opcode::MONITOR_EXIT => RegOp::MonitorExit {
                object: self.u16()?,
            },
            opcode::THROW => RegOp::Throw {
                exception: self.u16()?,
            },
            opcode::GOTO => RegOp::Goto {
                target: self.u32()?,
            },
            opcode::IF => {
                let cond = decode_if_cond(self.u8()?)?;
                let lhs = self.u16()?;
                let rhs = match self.u8()? {
                    0 => None,
                    1 => Some(self.u16()?),
                    tag => return Err(malformed_error!("bad comparison operand tag {tag}")),
                };
                RegOp::If {
                    cond,
                    lhs,
                    rhs,
                    target: self.u32()?,
                }
            }
            opcode::SWITCH => {
                let value = self.u16()?;
                let case_count = self.u32()? as usize;
                let mut cases = Vec::with_capacity(case_count);
                for _ in 0..case_count {
                    let key = self.i32()?;
                    let target = self.u32()?;
                    cases.push((key, target));
                }
                RegOp::Switch { value, cases }
            }
            opcode::RETURN => RegOp::Return { src: self.u16()? },
            opcode::RETURN_VOID => RegOp::ReturnVoid,
            unknown => return Err(malformed_error!("unknown opcode byte {unknown:#04X}")),
        };
        Ok(op)
    }

    fn decoded_string(&self, index: u32) -> Result<StringId> {
        self.strings
            .get(index as usize)
            .copied()
            .ok_or_else(|| malformed_error!("string index {index} out of range"))
    }
}

fn decode_binary_op(code: u8) -> Result<BinaryOp> {
    Ok(match code {
        0 => BinaryOp::Add,
        1 => BinaryOp::Sub,
        2 => BinaryOp::Mul,
        3 => BinaryOp::Div,
        4 => BinaryOp::Rem,
        5 => BinaryOp::And,
        6 => BinaryOp::Or,
        7 => BinaryOp::Xor,
        8 => BinaryOp::Shl,
        9 => BinaryOp::Shr,
        other => return Err(malformed_error!("unknown binary operation code {other}")),
    })
}

fn decode_if_cond(code: u8) -> Result<IfCond> {
    Ok(match code {
        0 => IfCond::Eq,
        1 => IfCond::Ne,
        2 => IfCond::Lt,
        3 => IfCond::Ge,
        4 => IfCond::Gt,
        5 => IfCond::Le,
        other => return Err(malformed_error!("unknown condition code {other}")),
    })
}

fn decode_invoke_kind(code: u8) -> Result<InvokeKind> {
    Ok(match code {
        0 => InvokeKind::Static,
        1 => InvokeKind::Virtual,
        2 => InvokeKind::Direct,
        3 => InvokeKind::Interface,
        other => return Err(malformed_error!("unknown dispatch kind code {other}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encode::{write_container, ClassFootprint, Container},
        model::{Application, Phase},
    };

    fn encode_sample() -> (Vec<u8>, Vec<String>) {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let ty = pools.class_type("Lapp/Main;").unwrap();
        let mut class = ClassDef::new(ty, ClassFlags::PUBLIC, Some(wk.object));
        let run = pools.method(ty, "run", wk.int, &[wk.int]);
        class.methods.push(MethodDef {
            reference: run,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: None,
        });
        let mut app = Application::build(pools.clone(), vec![class.clone()], Vec::new()).unwrap();
        app.set_phase(Phase::Frozen);

        let mut bodies = HashMap::new();
        bodies.insert(
            run,
            LoweredMethod {
                registers: 2,
                ops: vec![
                    RegOp::Binary {
                        op: BinaryOp::Add,
                        dest: 1,
                        lhs: 0,
                        rhs: 0,
                    },
                    RegOp::Return { src: 1 },
                ],
                handlers: Vec::new(),
            },
        );

        let footprint = ClassFootprint::collect(&class, &bodies, &pools).unwrap();
        let mut container = Container::new();
        assert!(container.try_add(&footprint).unwrap());
        container.seal();
        let encoded = write_container(&mut container, &app, &bodies, &pools).unwrap();
        (encoded.bytes, encoded.classes)
    }

    #[test]
    fn test_round_trip() {
        let (bytes, class_names) = encode_sample();
        let decoded = read_container(&bytes).unwrap();

        assert_eq!(decoded.classes.len(), 1);
        let class = &decoded.classes[0];
        assert_eq!(decoded.pools.types.descriptor(class.ty), class_names[0]);
        assert_eq!(class.methods.len(), 1);

        let method = &class.methods[0];
        assert_eq!(decoded.pools.method_name(method.reference), "run");
        let body = &decoded.codes[&method.reference];
        assert_eq!(body.registers, 2);
        assert_eq!(
            body.ops,
            vec![
                RegOp::Binary {
                    op: BinaryOp::Add,
                    dest: 1,
                    lhs: 0,
                    rhs: 0,
                },
                RegOp::Return { src: 1 },
            ]
        );
    }

    #[test]
    fn test_corrupted_payload_fails_checksum() {
        let (mut bytes, _) = encode_sample();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = read_container(&bytes).unwrap_err();
        assert!(matches!(err, crate::Error::Malformed { .. }));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let (mut bytes, _) = encode_sample();
        bytes[0] = b'X';
        assert!(read_container(&bytes).is_err());
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let (bytes, _) = encode_sample();
        assert!(read_container(&bytes[..HEADER_LEN + 3]).is_err());
    }
}
