//! Bitswap 1.2.0 protobuf schema.
//!
//! ```text
//! message Message {
//!   message Wantlist {
//!     enum WantType { Block = 0; Have = 1; }
//!     message Entry {
//!       bytes block = 1;
//!       int32 priority = 2;
//!       bool cancel = 3;
//!       WantType wantType = 4;
//!       bool sendDontHave = 5;
//!     }
//!     repeated Entry entries = 1;
//!     bool full = 2;
//!   }
//!   message Block {
//!     bytes prefix = 1;
//!     bytes data = 2;
//!   }
//!   enum BlockPresenceType { Have = 0; DontHave = 1; }
//!   message BlockPresence {
//!     bytes cid = 1;
//!     BlockPresenceType type = 2;
//!   }
//!   Wantlist wantlist = 1;
//!   repeated bytes blocks = 2;
//!   repeated Block payload = 3;
//!   repeated BlockPresence blockPresences = 4;
//!   int32 pendingBytes = 5;
//! }
//! ```

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(message, optional, tag = "1")]
    pub wantlist: Option<message::Wantlist>,
    /// Bitswap 1.0 blocks, bare bytes
    #[prost(bytes = "bytes", repeated, tag = "2")]
    pub blocks: Vec<bytes::Bytes>,
    #[prost(message, repeated, tag = "3")]
    pub payload: Vec<message::Block>,
    #[prost(message, repeated, tag = "4")]
    pub block_presences: Vec<message::BlockPresence>,
    #[prost(int32, tag = "5")]
    pub pending_bytes: i32,
}

pub mod message {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Wantlist {
        #[prost(message, repeated, tag = "1")]
        pub entries: Vec<wantlist::Entry>,
        #[prost(bool, tag = "2")]
        pub full: bool,
    }

    pub mod wantlist {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum WantType {
            Block = 0,
            Have = 1,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Entry {
            #[prost(bytes = "vec", tag = "1")]
            pub block: Vec<u8>,
            #[prost(int32, tag = "2")]
            pub priority: i32,
            #[prost(bool, tag = "3")]
            pub cancel: bool,
            #[prost(enumeration = "WantType", tag = "4")]
            pub want_type: i32,
            #[prost(bool, tag = "5")]
            pub send_dont_have: bool,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Block {
        #[prost(bytes = "vec", tag = "1")]
        pub prefix: Vec<u8>,
        #[prost(bytes = "bytes", tag = "2")]
        pub data: bytes::Bytes,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum BlockPresenceType {
        Have = 0,
        DontHave = 1,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BlockPresence {
        #[prost(bytes = "vec", tag = "1")]
        pub cid: Vec<u8>,
        #[prost(enumeration = "BlockPresenceType", tag = "2")]
        pub r#type: i32,
    }
}
