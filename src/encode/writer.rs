//! Container serialization.
//!
//! Layout: a fixed header (magic, version, sha1 payload checksum, section
//! counts) followed by the string, type, proto, field, method and class
//! sections. Container-local indices are the positions of the container's
//! sorted reference sets; the writer may append strings of its own (the
//! producer marker) after class-referenced ones, so string instructions are
//! encoded in the jumbo form whenever the final index outgrows 16 bits.
//! The checksum is computed last, over the finished payload.

use std::collections::HashMap;

use sha1::{Digest, Sha1};

use crate::{
    bytecode::{BinaryOp, IfCond, InvokeKind},
    model::{
        Application, ConstValue, FieldRef, MethodRef, Pools, Proto, StringId, Type,
    },
    Result,
};

use super::{
    io::{write_i32, write_u16, write_u32, write_u8},
    Container, LoweredMethod, RegOp,
};

/// File magic of an encoded container.
pub const MAGIC: [u8; 4] = *b"DEXO";
/// Format version the writer emits.
pub const VERSION: u16 = 1;
/// Header length in bytes: magic, version, reserved, sha1, six counts.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 20 + 6 * 4;

/// Marker string the writer appends to every string section.
pub(super) const PRODUCER: &str = "dexopt";

/// Sentinel index meaning "absent" in optional u16 slots.
const NONE_U16: u16 = 0xFFFF;

/// One written container: its bytes and the classes it holds.
#[derive(Debug)]
pub struct EncodedContainer {
    /// The serialized container.
    pub bytes: Vec<u8>,
    /// Descriptors of the packed classes, in addition order.
    pub classes: Vec<String>,
}

/// Serializes a sealed container and marks it written.
///
/// # Errors
///
/// [`crate::Error::Internal`] when a class or reference the container claims
/// to hold is missing from the model, or the container is not sealed.
pub fn write_container(
    container: &mut Container,
    app: &Application,
    bodies: &HashMap<MethodRef, LoweredMethod>,
    pools: &Pools,
) -> Result<EncodedContainer> {
    let indices = Indices::assign(container, pools);
    let payload = write_payload(container, app, bodies, pools, &indices)?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&MAGIC);
    write_u16(&mut bytes, VERSION);
    write_u16(&mut bytes, 0);
    let digest = Sha1::digest(&payload);
    bytes.extend_from_slice(&digest);
    write_u32(&mut bytes, cast_count(indices.string_order.len())?);
    write_u32(&mut bytes, cast_count(indices.types.len())?);
    write_u32(&mut bytes, cast_count(indices.protos.len())?);
    write_u32(&mut bytes, cast_count(indices.fields.len())?);
    write_u32(&mut bytes, cast_count(indices.methods.len())?);
    write_u32(&mut bytes, cast_count(container.classes().len())?);
    bytes.extend_from_slice(&payload);

    container.mark_written()?;
    let classes = container
        .classes()
        .iter()
        .map(|&ty| pools.types.descriptor(ty).to_string())
        .collect();
    Ok(EncodedContainer { bytes, classes })
}

fn cast_count(count: usize) -> Result<u32> {
    u32::try_from(count).map_err(|_| internal_error!("section of {count} entries"))
}

/// Container-local index assignment. Sorted-set order makes it
/// deterministic; the producer marker lands after every class-referenced
/// string.
struct Indices {
    strings: HashMap<StringId, u32>,
    string_order: Vec<StringId>,
    types: HashMap<Type, u16>,
    type_order: Vec<Type>,
    protos: HashMap<Proto, u16>,
    proto_order: Vec<Proto>,
    fields: HashMap<FieldRef, u16>,
    field_order: Vec<FieldRef>,
    methods: HashMap<MethodRef, u16>,
    method_order: Vec<MethodRef>,
}

impl Indices {
    fn assign(container: &Container, pools: &Pools) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        fn number16<T: Copy + Eq + std::hash::Hash>(
            set: impl IntoIterator<Item = T>,
        ) -> (HashMap<T, u16>, Vec<T>) {
            let order: Vec<T> = set.into_iter().collect();
            let map = order
                .iter()
                .enumerate()
                .map(|(i, &item)| (item, i as u16))
                .collect();
            (map, order)
        }

        let mut string_order: Vec<StringId> = container.strings.iter().copied().collect();
        let marker = pools.name(PRODUCER);
        if !container.strings.contains(&marker) {
            string_order.push(marker);
        }
        #[allow(clippy::cast_possible_truncation)]
        let strings: HashMap<StringId, u32> = string_order
            .iter()
            .enumerate()
            .map(|(i, &s)| (s, i as u32))
            .collect();

        let (types, type_order) = number16(container.types.iter().copied());
        let (protos, proto_order) = number16(container.protos.iter().copied());
        let (fields, field_order) = number16(container.fields.iter().copied());
        let (methods, method_order) = number16(container.methods.iter().copied());
        Self {
            strings,
            string_order,
            types,
            type_order,
            protos,
            proto_order,
            fields,
            field_order,
            methods,
            method_order,
        }
    }

    fn string(&self, id: StringId) -> Result<u32> {
        self.strings
            .get(&id)
            .copied()
            .ok_or_else(|| internal_error!("string {} not packed in this container", id.index()))
    }

    fn ty(&self, ty: Type) -> Result<u16> {
        self.types
            .get(&ty)
            .copied()
            .ok_or_else(|| internal_error!("type {} not packed in this container", ty.index()))
    }

    fn proto(&self, proto: Proto) -> Result<u16> {
        self.protos
            .get(&proto)
            .copied()
            .ok_or_else(|| internal_error!("proto {} not packed in this container", proto.index()))
    }

    fn field(&self, field: FieldRef) -> Result<u16> {
        self.fields
            .get(&field)
            .copied()
            .ok_or_else(|| internal_error!("field {} not packed in this container", field.index()))
    }

    fn method(&self, method: MethodRef) -> Result<u16> {
        self.methods.get(&method).copied().ok_or_else(|| {
            internal_error!("method {} not packed in this container", method.index())
        })
    }
}

fn write_payload(
    container: &Container,
    app: &Application,
    bodies: &HashMap<MethodRef, LoweredMethod>,
    pools: &Pools,
    indices: &Indices,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    for &string in &indices.string_order {
        let content = pools.strings.get(string);
        write_u32(&mut out, cast_count(content.len())?);
        out.extend_from_slice(content.as_bytes());
    }

    for &ty in &indices.type_order {
        let descriptor = pools.name(pools.types.descriptor(ty));
        write_u32(&mut out, indices.string(descriptor)?);
    }

    for &proto in &indices.proto_order {
        let data = pools.protos.get(proto).clone();
        write_u16(&mut out, indices.ty(data.return_type)?);
        write_u32(&mut out, cast_count(data.parameters.len())?);
        for &param in &*data.parameters {
            write_u16(&mut out, indices.ty(param)?);
        }
    }

    for &field in &indices.field_order {
        let data = *pools.field_data(field);
        write_u16(&mut out, indices.ty(data.holder)?);
        write_u32(&mut out, indices.string(data.name)?);
        write_u16(&mut out, indices.ty(data.ty)?);
    }

    for &method in &indices.method_order {
        let data = *pools.method_data(method);
        write_u16(&mut out, indices.ty(data.holder)?);
        write_u32(&mut out, indices.string(data.name)?);
        write_u16(&mut out, indices.proto(data.proto)?);
    }

    for &ty in container.classes() {
        let class = app.class(ty).ok_or_else(|| {
            internal_error!(
                "packed class {} missing from the model",
                pools.types.descriptor(ty)
            )
        })?;
        write_class(&mut out, class, bodies, indices)?;
    }

    Ok(out)
}

fn write_class(
    out: &mut Vec<u8>,
    class: &crate::model::ClassDef,
    bodies: &HashMap<MethodRef, LoweredMethod>,
    indices: &Indices,
) -> Result<()> {
    write_u16(out, indices.ty(class.ty)?);
    write_u32(out, class.flags.bits());
    match class.superclass {
        Some(superclass) => write_u16(out, indices.ty(superclass)?),
        None => write_u16(out, NONE_U16),
    }
    write_u32(out, cast_count(class.interfaces.len())?);
    for &interface in &class.interfaces {
        write_u16(out, indices.ty(interface)?);
    }

    write_u32(out, cast_count(class.fields.len())?);
    for field in &class.fields {
        write_u16(out, indices.field(field.reference)?);
        write_u32(out, field.flags.bits());
        match field.static_value {
            None => write_u8(out, 0),
            Some(ConstValue::Int(value)) => {
                write_u8(out, 1);
                write_i32(out, value);
            }
            Some(ConstValue::String(s)) => {
                write_u8(out, 2);
                write_u32(out, indices.string(s)?);
            }
            Some(ConstValue::Null) => write_u8(out, 3),
        }
    }

    write_u32(out, cast_count(class.methods.len())?);
    for method in &class.methods {
        write_u16(out, indices.method(method.reference)?);
        write_u32(out, method.flags.bits());
        match bodies.get(&method.reference) {
            Some(body) => {
                write_u8(out, 1);
                write_code(out, body, indices)?;
            }
            None => write_u8(out, 0),
        }
    }
    Ok(())
}

fn write_code(out: &mut Vec<u8>, body: &LoweredMethod, indices: &Indices) -> Result<()> {
    write_u16(out, body.registers);
    write_u32(out, cast_count(body.ops.len())?);
    for op in &body.ops {
        write_op(out, op, indices)?;
    }
    write_u32(out, cast_count(body.handlers.len())?);
    for handler in &body.handlers {
        write_u32(out, handler.start);
        write_u32(out, handler.end);
        write_u32(out, handler.handler);
        match handler.catch_type {
            Some(ty) => write_u16(out, indices.ty(ty)?),
            None => write_u16(out, NONE_U16),
        }
    }
    Ok(())
}

pub(super) mod opcode {
    //! Opcode bytes of the serialized instruction forms.
    pub const CONST: u8 = 0x01;
    pub const CONST_STRING: u8 = 0x02;
    pub const CONST_STRING_JUMBO: u8 = 0x03;
    pub const CONST_NULL: u8 = 0x04;
    pub const MOVE: u8 = 0x05;
    pub const NEG: u8 = 0x06;
    pub const BINARY: u8 = 0x07;
    pub const ARRAY_GET: u8 = 0x08;
    pub const ARRAY_PUT: u8 = 0x09;
    pub const ARRAY_LENGTH: u8 = 0x0A;
    pub const NEW_INSTANCE: u8 = 0x0B;
    pub const NEW_ARRAY: u8 = 0x0C;
    pub const CHECK_CAST: u8 = 0x0D;
    pub const INSTANCE_OF: u8 = 0x0E;
    pub const STATIC_GET: u8 = 0x0F;
    pub const STATIC_PUT: u8 = 0x10;
    pub const INSTANCE_GET: u8 = 0x11;
    pub const INSTANCE_PUT: u8 = 0x12;
    pub const INVOKE: u8 = 0x13;
    pub const MOVE_RESULT: u8 = 0x14;
    pub const MOVE_EXCEPTION: u8 = 0x15;
    pub const MONITOR_ENTER: u8 = 0x16;
    pub const MONITOR_EXIT: u8 = 0x17;
    pub const THROW: u8 = 0x18;
    pub const GOTO: u8 = 0x19;
    pub const IF: u8 = 0x1A;
    pub const SWITCH: u8 = 0x1B;
    pub const RETURN: u8 = 0x1C;
    pub const RETURN_VOID: u8 = 0x1D;
}

pub(super) fn binary_op_code(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Add => 0,
        BinaryOp::Sub => 1,
        BinaryOp::Mul => 2,
        BinaryOp::Div => 3,
        BinaryOp::Rem => 4,
        BinaryOp::And => 5,
        BinaryOp::Or => 6,
        BinaryOp::Xor => 7,
        BinaryOp::Shl => 8,
        BinaryOp::Shr => 9,
    }
}

pub(super) fn if_cond_code(cond: IfCond) -> u8 {
    match cond {
        IfCond::Eq => 0,
        IfCond::Ne => 1,
        IfCond::Lt => 2,
        IfCond::Ge => 3,
        IfCond::Gt => 4,
        IfCond::Le => 5,
    }
}

pub(super) fn invoke_kind_code(kind: InvokeKind) -> u8 {
    match kind {
        InvokeKind::Static => 0,
        InvokeKind::Virtual => 1,
        InvokeKind::Direct => 2,
        InvokeKind::Interface => 3,
    }
}

#[allow(clippy::too_many_lines)]
fn write_op(out: &mut Vec<u8>, op: &RegOp, indices: &Indices) -> Result<()> {
    match op {
        RegOp::Const { dest, value } => {
            write_u8(out, opcode::CONST);
            write_u16(out, *dest);
            write_i32(out, *value);
        }
        RegOp::ConstString { dest, string } => {
            let index = indices.string(*string)?;
            // Jumbo form once the final index outgrows the small encoding.
            if let Ok(small) = u16::try_from(index) {
                write_u8(out, opcode::CONST_STRING);
                write_u16(out, *dest);
                write_u16(out, small);
            } else {
                write_u8(out, opcode::CONST_STRING_JUMBO);
                write_u16(out, *dest);
                write_u32(out, index);
            }
        }
        RegOp::ConstNull { dest } => {
            write_u8(out, opcode::CONST_NULL);
            write_u16(out, *dest);
        }
        RegOp::Move { dest, src } => {
            write_u8(out, opcode::MOVE);
            write_u16(out, *dest);
            write_u16(out, *src);
        }
        RegOp::Neg { dest, src } => {
            write_u8(out, opcode::NEG);
            write_u16(out, *dest);
            write_u16(out, *src);
        }
        RegOp::Binary { op, dest, lhs, rhs } => {
            write_u8(out, opcode::BINARY);
            write_u8(out, binary_op_code(*op));
            write_u16(out, *dest);
            write_u16(out, *lhs);
            write_u16(out, *rhs);
        }
        RegOp::ArrayGet { dest, array, index } => {
            write_u8(out, opcode::ARRAY_GET);
            write_u16(out, *dest);
            write_u16(out, *array);
            write_u16(out, *index);
        }
        RegOp::ArrayPut {
            array,
            index,
            value,
        } => {
            write_u8(out, opcode::ARRAY_PUT);
            write_u16(out, *array);
            write_u16(out, *index);
            write_u16(out, *value);
        }
        RegOp::ArrayLength { dest, array } => {
            write_u8(out, opcode::ARRAY_LENGTH);
            write_u16(out, *dest);
            write_u16(out, *array);
        }
        RegOp::NewInstance { dest, ty } => {
            write_u8(out, opcode::NEW_INSTANCE);
            write_u16(out, *dest);
            write_u16(out, indices.ty(*ty)?);
        }
        RegOp::NewArray { dest, ty, length } => {
            write_u8(out, opcode::NEW_ARRAY);
            write_u16(out, *dest);
            write_u16(out, indices.ty(*ty)?);
            write_u16(out, *length);
        }
        RegOp::CheckCast { dest, src, ty } => {
            write_u8(out, opcode::CHECK_CAST);
            write_u16(out, *dest);
            write_u16(out, *src);
            write_u16(out, indices.ty(*ty)?);
        }
        RegOp::InstanceOf { dest, src, ty } => {
            write_u8(out, opcode::INSTANCE_OF);
            write_u16(out, *dest);
            write_u16(out, *src);
            write_u16(out, indices.ty(*ty)?);
        }
        RegOp::StaticGet { dest, field } => {
            write_u8(out, opcode::STATIC_GET);
            write_u16(out, *dest);
            write_u16(out, indices.field(*field)?);
        }
        RegOp::StaticPut { field, value } => {
            write_u8(out, opcode::STATIC_PUT);
            write_u16(out, indices.field(*field)?);
            write_u16(out, *value);
        }
        RegOp::InstanceGet {
            dest,
            field,
            object,
        } => {
            write_u8(out, opcode::INSTANCE_GET);
            write_u16(out, *dest);
            write_u16(out, indices.field(*field)?);
            write_u16(out, *object);
        }
        RegOp::InstancePut {
            field,
            object,
            value,
        } => {
            write_u8(out, opcode::INSTANCE_PUT);
            write_u16(out, indices.field(*field)?);
            write_u16(out, *object);
            write_u16(out, *value);
        }
        RegOp::Invoke { kind, method, args } => {
            write_u8(out, opcode::INVOKE);
            write_u8(out, invoke_kind_code(*kind));
            write_u16(out, indices.method(*method)?);
            write_u8(
                out,
                u8::try_from(args.len())
                    .map_err(|_| internal_error!("call with {} arguments", args.len()))?,
            );
            for &arg in args {
                write_u16(out, arg);
            }
        }
        RegOp::MoveResult { dest } => {
            write_u8(out, opcode::MOVE_RESULT);
            write_u16(out, *dest);
        }
        RegOp::MoveException { dest } => {
            write_u8(out, opcode::MOVE_EXCEPTION);
            write_u16(out, *dest);
        }
        RegOp::MonitorEnter { object } => {
            write_u8(out, opcode::MONITOR_ENTER);
            write_u16(out, *object);
        }
        RegOp::MonitorExit { object } => {
            write_u8(out, opcode::MONITOR_EXIT);
            write_u16(out, *object);
        }
        RegOp::Throw { exception } => {
            write_u8(out, opcode::THROW);
            write_u16(out, *exception);
        }
        RegOp::Goto { target } => {
            write_u8(out, opcode::GOTO);
            write_u32(out, *target);
        }
        RegOp::If {
            cond,
            lhs,
            rhs,
            target,
        } => {
            write_u8(out, opcode::IF);
            write_u8(out, if_cond_code(*cond));
            write_u16(out, *lhs);
            match rhs {
                Some(rhs) => {
                    write_u8(out, 1);
                    write_u16(out, *rhs);
                }
                None => write_u8(out, 0),
            }
            write_u32(out, *target);
        }
        RegOp::Switch { value, cases } => {
            write_u8(out, opcode::SWITCH);
            write_u16(out, *value);
            write_u32(out, cast_count(cases.len())?);
            for &(key, target) in cases {
                write_i32(out, key);
                write_u32(out, target);
            }
        }
        RegOp::Return { src } => {
            write_u8(out, opcode::RETURN);
            write_u16(out, *src);
        }
        RegOp::ReturnVoid => write_u8(out, opcode::RETURN_VOID),
    }
    Ok(())
}
