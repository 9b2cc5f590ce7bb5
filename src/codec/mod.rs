//! Codec module - record serialization for frame payloads.
//!
//! Every payload is a sequence of records written with the big-endian
//! binary archive:
//!
//! - [`OutputArchive`] / [`InputArchive`] - primitive encoding
//! - [`Record`] - a type with a fixed field order
//! - [`records`] - request, response and header records of the protocol
//! - [`acl`] - identities, ACLs and permission bits
//!
//! # Design
//!
//! Records are plain structs with public fields. Serialization is
//! deterministic and total; deserialization either yields a whole record or
//! a `Protocol` error, never a partial one.
//!
//! # Example
//!
//! ```
//! use zkwire_client::codec::{decode, encode, records::ExistsRequest};
//!
//! let req = ExistsRequest { path: "/a".to_string(), watch: true };
//! let bytes = encode(&req);
//! let back: ExistsRequest = decode(bytes).unwrap();
//! assert_eq!(back, req);
//! ```

use bytes::Bytes;

use crate::error::Result;

/// A record with a fixed, declaration-ordered wire layout.
pub trait Record: Sized {
    /// Append this record to the archive.
    fn serialize(&self, out: &mut OutputArchive);

    /// Read one whole record from the archive.
    fn deserialize(input: &mut InputArchive) -> Result<Self>;
}

/// Serialize a single record into bytes.
pub fn encode<T: Record>(record: &T) -> Bytes {
    let mut out = OutputArchive::new();
    record.serialize(&mut out);
    out.into_bytes()
}

/// Deserialize a single record from bytes.
pub fn decode<T: Record>(bytes: Bytes) -> Result<T> {
    let mut input = InputArchive::new(bytes);
    T::deserialize(&mut input)
}

/// Declares a record struct and its `Record` impl from one field list.
///
/// Each field names its wire kind: `int`, `long`, `bool`, `buffer`,
/// `string`, `record` or `vec`.
macro_rules! record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty => $kind:ident ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::codec::Record for $name {
            #[allow(unused_variables)]
            fn serialize(&self, out: &mut $crate::codec::OutputArchive) {
                $( $crate::codec::record!(@write out, $kind, &self.$field); )*
            }

            #[allow(unused_variables)]
            fn deserialize(
                input: &mut $crate::codec::InputArchive,
            ) -> $crate::error::Result<Self> {
                Ok(Self {
                    $( $field: $crate::codec::record!(@read input, $kind), )*
                })
            }
        }
    };

    (@write $out:ident, int, $v:expr) => { $out.write_i32(*$v) };
    (@write $out:ident, long, $v:expr) => { $out.write_i64(*$v) };
    (@write $out:ident, bool, $v:expr) => { $out.write_bool(*$v) };
    (@write $out:ident, buffer, $v:expr) => { $out.write_buffer($v) };
    (@write $out:ident, string, $v:expr) => { $out.write_string($v) };
    (@write $out:ident, record, $v:expr) => { $out.write_record($v) };
    (@write $out:ident, vec, $v:expr) => { $out.write_vec($v) };

    (@read $input:ident, int) => { $input.read_i32()? };
    (@read $input:ident, long) => { $input.read_i64()? };
    (@read $input:ident, bool) => { $input.read_bool()? };
    (@read $input:ident, buffer) => { $input.read_buffer()? };
    (@read $input:ident, string) => { $input.read_string()? };
    (@read $input:ident, record) => { $input.read_record()? };
    (@read $input:ident, vec) => { $input.read_vec()? };
}

pub(crate) use record;

pub mod acl;
mod archive;
pub mod records;

pub use archive::{InputArchive, OutputArchive};
