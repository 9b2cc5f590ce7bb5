//! Request bodies and typed replies.
//!
//! An [`Op`] knows its opcode and how to encode itself behind a
//! `RequestHeader`. A [`Response`] is decoded from the reply body by the
//! opcode of the request it answers.

use bytes::Bytes;

use crate::codec::acl::Acl;
use crate::codec::records::{
    AuthPacket, CreateRequest, CreateResponse, DeleteRequest, ExistsRequest, ExistsResponse,
    GetAclRequest, GetAclResponse, GetChildren2Response, GetChildrenRequest, GetChildrenResponse,
    GetDataRequest, GetDataResponse, RequestHeader, SetAclRequest, SetAclResponse, SetDataRequest,
    SetDataResponse, Stat, SyncRequest, SyncResponse,
};
use crate::codec::{InputArchive, OutputArchive, Record};
use crate::error::{Result, ZkError};
use crate::protocol::op;

/// One request body. Paths are server-side (chroot applied).
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Create(CreateRequest),
    Delete(DeleteRequest),
    Exists(ExistsRequest),
    GetData(GetDataRequest),
    SetData(SetDataRequest),
    GetChildren(GetChildrenRequest),
    GetChildren2(GetChildrenRequest),
    GetAcl(GetAclRequest),
    SetAcl(SetAclRequest),
    Sync(SyncRequest),
    Auth(AuthPacket),
    Ping,
    CloseSession,
}

impl Op {
    pub fn opcode(&self) -> i32 {
        match self {
            Op::Create(_) => op::CREATE,
            Op::Delete(_) => op::DELETE,
            Op::Exists(_) => op::EXISTS,
            Op::GetData(_) => op::GET_DATA,
            Op::SetData(_) => op::SET_DATA,
            Op::GetChildren(_) => op::GET_CHILDREN,
            Op::GetChildren2(_) => op::GET_CHILDREN2,
            Op::GetAcl(_) => op::GET_ACL,
            Op::SetAcl(_) => op::SET_ACL,
            Op::Sync(_) => op::SYNC,
            Op::Auth(_) => op::AUTH,
            Op::Ping => op::PING,
            Op::CloseSession => op::CLOSE_SESSION,
        }
    }

    /// Encode header and body into one frame payload.
    pub fn encode(&self, xid: i32) -> Bytes {
        let mut out = OutputArchive::with_capacity(64);
        RequestHeader {
            xid,
            op_type: self.opcode(),
        }
        .serialize(&mut out);

        match self {
            Op::Create(r) => r.serialize(&mut out),
            Op::Delete(r) => r.serialize(&mut out),
            Op::Exists(r) => r.serialize(&mut out),
            Op::GetData(r) => r.serialize(&mut out),
            Op::SetData(r) => r.serialize(&mut out),
            Op::GetChildren(r) | Op::GetChildren2(r) => r.serialize(&mut out),
            Op::GetAcl(r) => r.serialize(&mut out),
            Op::SetAcl(r) => r.serialize(&mut out),
            Op::Sync(r) => r.serialize(&mut out),
            Op::Auth(r) => r.serialize(&mut out),
            Op::Ping | Op::CloseSession => {}
        }
        out.into_bytes()
    }
}

/// Reply body, shaped by the request's opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Response {
    Empty,
    Path(String),
    Stat(Stat),
    Data(Vec<u8>, Stat),
    Children(Vec<String>),
    Children2(Vec<String>, Stat),
    Acl(Vec<Acl>, Stat),
}

impl Response {
    /// Decode a successful reply body for a request with `opcode`.
    pub fn decode(opcode: i32, input: &mut InputArchive) -> Result<Self> {
        Ok(match opcode {
            op::CREATE => Response::Path(CreateResponse::deserialize(input)?.path),
            op::EXISTS => Response::Stat(ExistsResponse::deserialize(input)?.stat),
            op::GET_DATA => {
                let r = GetDataResponse::deserialize(input)?;
                Response::Data(r.data, r.stat)
            }
            op::SET_DATA => Response::Stat(SetDataResponse::deserialize(input)?.stat),
            op::GET_CHILDREN => Response::Children(GetChildrenResponse::deserialize(input)?.children),
            op::GET_CHILDREN2 => {
                let r = GetChildren2Response::deserialize(input)?;
                Response::Children2(r.children, r.stat)
            }
            op::GET_ACL => {
                let r = GetAclResponse::deserialize(input)?;
                Response::Acl(r.acl, r.stat)
            }
            op::SET_ACL => Response::Stat(SetAclResponse::deserialize(input)?.stat),
            op::SYNC => Response::Path(SyncResponse::deserialize(input)?.path),
            _ => Response::Empty,
        })
    }

    fn mismatch(self, wanted: &str) -> ZkError {
        ZkError::Protocol(format!("Expected {} reply, got {:?}", wanted, self))
    }

    pub fn into_path(self) -> Result<String> {
        match self {
            Response::Path(path) => Ok(path),
            other => Err(other.mismatch("path")),
        }
    }

    pub fn into_stat(self) -> Result<Stat> {
        match self {
            Response::Stat(stat) => Ok(stat),
            other => Err(other.mismatch("stat")),
        }
    }

    pub fn into_data(self) -> Result<(Vec<u8>, Stat)> {
        match self {
            Response::Data(data, stat) => Ok((data, stat)),
            other => Err(other.mismatch("data")),
        }
    }

    pub fn into_children(self) -> Result<Vec<String>> {
        match self {
            Response::Children(children) => Ok(children),
            Response::Children2(children, _) => Ok(children),
            other => Err(other.mismatch("children")),
        }
    }

    pub fn into_children2(self) -> Result<(Vec<String>, Stat)> {
        match self {
            Response::Children2(children, stat) => Ok((children, stat)),
            other => Err(other.mismatch("children2")),
        }
    }

    pub fn into_acl(self) -> Result<(Vec<Acl>, Stat)> {
        match self {
            Response::Acl(acl, stat) => Ok((acl, stat)),
            other => Err(other.mismatch("acl")),
        }
    }

    pub fn into_empty(self) -> Result<()> {
        match self {
            Response::Empty => Ok(()),
            other => Err(other.mismatch("empty")),
        }
    }
}
