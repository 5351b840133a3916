//! RPC request encoding.
//!
//! ```text
//! ALL_HEADERS | ProcName (US_VARCHAR) or 0xFFFF + ProcID | OptionFlags (u16)
//!   | { ParamName (B_VARCHAR) | StatusFlags (u8) | TYPE_INFO | value }*
//! ```
//!
//! Parameterized commands go through `sp_executesql`, which the server knows
//! by id 10.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use tds_types::strings::{encode_utf16, write_b_varchar};
use tds_types::{SqlValue, TypeInfo, encode_value};

use crate::error::ProtocolError;
use crate::sql_batch::write_all_headers;

/// Well-known stored procedure ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProcId {
    /// sp_executesql
    ExecuteSql = 0x000A,
    /// sp_prepare
    Prepare = 0x000B,
    /// sp_execute
    Execute = 0x000C,
    /// sp_prepexec
    PrepExec = 0x000D,
    /// sp_unprepare
    Unprepare = 0x000F,
}

bitflags! {
    /// RPC option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RpcOptionFlags: u16 {
        /// Recompile the procedure.
        const WITH_RECOMPILE = 0x0001;
        /// Do not send metadata.
        const NO_METADATA = 0x0002;
        /// Reuse metadata from the previous call.
        const REUSE_METADATA = 0x0004;
    }
}

bitflags! {
    /// Parameter status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamFlags: u8 {
        /// Output parameter, returned in a RETURNVALUE token.
        const BY_REF = 0x01;
        /// Use the procedure's default value; no value is sent.
        const DEFAULT = 0x02;
    }
}

/// One RPC parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcParam {
    /// Name including `@`, or empty for positional parameters.
    pub name: String,
    /// Status flags.
    pub flags: ParamFlags,
    /// Declared wire type.
    pub type_info: TypeInfo,
    /// Value.
    pub value: SqlValue,
}

impl RpcParam {
    /// Parameter typed by the narrowest type able to carry `value`.
    pub fn new(name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            flags: ParamFlags::empty(),
            type_info: TypeInfo::for_value(&value),
            value,
        }
    }

    /// Parameter with an explicit wire type.
    pub fn typed(name: impl Into<String>, type_info: TypeInfo, value: impl Into<SqlValue>) -> Self {
        Self {
            name: name.into(),
            flags: ParamFlags::empty(),
            type_info,
            value: value.into(),
        }
    }

    /// Mark as an output parameter.
    #[must_use]
    pub fn output(mut self) -> Self {
        self.flags.insert(ParamFlags::BY_REF);
        self
    }

    /// Send no value and let the procedure use its default.
    #[must_use]
    pub fn use_default(mut self) -> Self {
        self.flags.insert(ParamFlags::DEFAULT);
        self
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        write_b_varchar(dst, &self.name)?;
        dst.put_u8(self.flags.bits());
        self.type_info.encode(dst);
        if self.flags.contains(ParamFlags::DEFAULT) {
            encode_value(&SqlValue::Null, &self.type_info, dst)?;
        } else {
            encode_value(&self.value, &self.type_info, dst)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProcTarget {
    Name(String),
    Id(ProcId),
}

/// RPC request builder.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    target: ProcTarget,
    options: RpcOptionFlags,
    params: Vec<RpcParam>,
}

impl RpcRequest {
    /// Call a procedure by name.
    pub fn named(proc_name: impl Into<String>) -> Self {
        Self {
            target: ProcTarget::Name(proc_name.into()),
            options: RpcOptionFlags::empty(),
            params: Vec::new(),
        }
    }

    /// Call a well-known procedure by id.
    #[must_use]
    pub fn by_id(proc_id: ProcId) -> Self {
        Self {
            target: ProcTarget::Id(proc_id),
            options: RpcOptionFlags::empty(),
            params: Vec::new(),
        }
    }

    /// Build an `sp_executesql` call.
    ///
    /// The statement and declaration list go out as `nvarchar(n)`, or as
    /// `nvarchar(max)` only when longer than 4000 characters.
    ///
    /// Unnamed parameters are named `@p1`, `@p2`, … by position; the
    /// declaration list is derived from each parameter's type info.
    #[must_use]
    pub fn execute_sql(sql: &str, params: Vec<RpcParam>) -> Self {
        let mut request = Self::by_id(ProcId::ExecuteSql);
        request.params.push(RpcParam::new("", sql));

        if params.is_empty() {
            return request;
        }

        let params: Vec<RpcParam> = params
            .into_iter()
            .enumerate()
            .map(|(i, mut p)| {
                if p.name.is_empty() {
                    p.name = format!("@p{}", i + 1);
                } else if !p.name.starts_with('@') {
                    p.name = format!("@{}", p.name);
                }
                p
            })
            .collect();

        let declarations = params
            .iter()
            .map(|p| {
                let output = if p.flags.contains(ParamFlags::BY_REF) {
                    " output"
                } else {
                    ""
                };
                format!("{} {}{output}", p.name, p.type_info.sql_declaration())
            })
            .collect::<Vec<_>>()
            .join(", ");
        request.params.push(RpcParam::new("", declarations));
        request.params.extend(params);
        request
    }

    /// Set option flags.
    #[must_use]
    pub fn with_options(mut self, options: RpcOptionFlags) -> Self {
        self.options = options;
        self
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, param: RpcParam) -> Self {
        self.params.push(param);
        self
    }

    /// Parameters in send order.
    #[must_use]
    pub fn params(&self) -> &[RpcParam] {
        &self.params
    }

    /// Encode the request payload.
    pub fn encode(&self, transaction_descriptor: u64) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(256);
        write_all_headers(&mut buf, transaction_descriptor);

        match &self.target {
            ProcTarget::Id(id) => {
                buf.put_u16_le(0xFFFF);
                buf.put_u16_le(*id as u16);
            }
            ProcTarget::Name(name) => {
                let units = name.encode_utf16().count();
                let len = u16::try_from(units)
                    .ok()
                    .filter(|l| *l < 0xFFFF)
                    .ok_or(ProtocolError::FieldTooLong {
                        field: "procedure name",
                        len: units,
                    })?;
                buf.put_u16_le(len);
                encode_utf16(name, &mut buf);
            }
        }
        buf.put_u16_le(self.options.bits());

        for param in &self.params {
            param.encode(&mut buf)?;
        }
        Ok(buf.freeze())
    }
}
