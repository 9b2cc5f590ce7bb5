//! Protocol records: headers, handshake, requests and responses.
//!
//! Field order here is the wire order.

use super::acl::Acl;
use super::record;

record! {
    /// Node metadata returned by most read and write operations.
    #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Stat {
        /// Zxid of the change that created this node.
        pub czxid: i64 => long,
        /// Zxid of the change that last modified this node's data.
        pub mzxid: i64 => long,
        pub ctime: i64 => long,
        pub mtime: i64 => long,
        /// Data version.
        pub version: i32 => int,
        /// Children version.
        pub cversion: i32 => int,
        /// ACL version.
        pub aversion: i32 => int,
        /// Owning session id if ephemeral, otherwise 0.
        pub ephemeral_owner: i64 => long,
        pub data_length: i32 => int,
        pub num_children: i32 => int,
        /// Zxid of the change that last modified this node's children.
        pub pzxid: i64 => long,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ConnectRequest {
        pub protocol_version: i32 => int,
        pub last_zxid_seen: i64 => long,
        pub time_out: i32 => int,
        pub session_id: i64 => long,
        pub passwd: Vec<u8> => buffer,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ConnectResponse {
        pub protocol_version: i32 => int,
        pub time_out: i32 => int,
        pub session_id: i64 => long,
        pub passwd: Vec<u8> => buffer,
    }
}

record! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct RequestHeader {
        pub xid: i32 => int,
        pub op_type: i32 => int,
    }
}

record! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ReplyHeader {
        pub xid: i32 => int,
        pub zxid: i64 => long,
        pub err: i32 => int,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct CreateRequest {
        pub path: String => string,
        pub data: Vec<u8> => buffer,
        pub acl: Vec<Acl> => vec,
        pub flags: i32 => int,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct CreateResponse {
        pub path: String => string,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct DeleteRequest {
        pub path: String => string,
        pub version: i32 => int,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ExistsRequest {
        pub path: String => string,
        pub watch: bool => bool,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ExistsResponse {
        pub stat: Stat => record,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct GetDataRequest {
        pub path: String => string,
        pub watch: bool => bool,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct GetDataResponse {
        pub data: Vec<u8> => buffer,
        pub stat: Stat => record,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SetDataRequest {
        pub path: String => string,
        pub data: Vec<u8> => buffer,
        pub version: i32 => int,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SetDataResponse {
        pub stat: Stat => record,
    }
}

record! {
    /// Used for both `getChildren` and `getChildren2`; the layout is identical.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct GetChildrenRequest {
        pub path: String => string,
        pub watch: bool => bool,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct GetChildrenResponse {
        pub children: Vec<String> => vec,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct GetChildren2Response {
        pub children: Vec<String> => vec,
        pub stat: Stat => record,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct GetAclRequest {
        pub path: String => string,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct GetAclResponse {
        pub acl: Vec<Acl> => vec,
        pub stat: Stat => record,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SetAclRequest {
        pub path: String => string,
        pub acl: Vec<Acl> => vec,
        pub version: i32 => int,
    }
}

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SetAclResponse {
        pub stat: Stat => record,
    }
}

record! {
    /// Used for both the `sync` request and its response.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SyncRequest {
        pub path: String => string,
    }
}

/// The `sync` reply carries the same single path field.
pub type SyncResponse = SyncRequest;

record! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct AuthPacket {
        pub auth_type: i32 => int,
        pub scheme: String => string,
        pub auth: Vec<u8> => buffer,
    }
}

record! {
    /// Raw notification body sent with the notification xid.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct WatcherEvent {
        pub event_type: i32 => int,
        pub state: i32 => int,
        pub path: String => string,
    }
}
