//! Client-side views of store responses.

use std::borrow::Cow;

use etcd_api_types::etcdserverpb::{self as pb, ResponseHeader};
use etcd_api_types::mvccpb;

pub use etcd_api_types::mvccpb::event::EventType;

fn revision(header: Option<ResponseHeader>) -> i64 {
    header.map(|h| h.revision).unwrap_or_default()
}

/// A key-value pair as the store held it at some revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub version: i64,
    pub lease: i64,
}

impl KeyValue {
    pub fn key_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    pub fn value_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

impl From<mvccpb::KeyValue> for KeyValue {
    fn from(kv: mvccpb::KeyValue) -> Self {
        Self {
            key: kv.key,
            value: kv.value,
            create_revision: kv.create_revision,
            mod_revision: kv.mod_revision,
            version: kv.version,
            lease: kv.lease,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PutResponse {
    /// Revision assigned to this write.
    pub revision: i64,
    pub prev_kv: Option<KeyValue>,
}

impl From<pb::PutResponse> for PutResponse {
    fn from(resp: pb::PutResponse) -> Self {
        Self {
            revision: revision(resp.header),
            prev_kv: resp.prev_kv.map(KeyValue::from),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetResponse {
    /// Store revision when the read was served.
    pub revision: i64,
    pub kvs: Vec<KeyValue>,
    /// More keys matched than `limit` allowed.
    pub more: bool,
    pub count: i64,
}

impl From<pb::RangeResponse> for GetResponse {
    fn from(resp: pb::RangeResponse) -> Self {
        Self {
            revision: revision(resp.header),
            kvs: resp.kvs.into_iter().map(KeyValue::from).collect(),
            more: resp.more,
            count: resp.count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeleteResponse {
    pub revision: i64,
    pub deleted: i64,
    pub prev_kvs: Vec<KeyValue>,
}

impl From<pb::DeleteRangeResponse> for DeleteResponse {
    fn from(resp: pb::DeleteRangeResponse) -> Self {
        Self {
            revision: revision(resp.header),
            deleted: resp.deleted,
            prev_kvs: resp.prev_kvs.into_iter().map(KeyValue::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: i64,
    /// Seconds, as granted by the store.
    pub ttl: i64,
}

#[derive(Debug, Clone)]
pub struct LeaseTimeToLive {
    pub id: i64,
    /// Remaining seconds; -1 when the lease does not exist (anymore).
    pub ttl: i64,
    pub granted_ttl: i64,
    pub keys: Vec<Vec<u8>>,
}

impl From<pb::LeaseTimeToLiveResponse> for LeaseTimeToLive {
    fn from(resp: pb::LeaseTimeToLiveResponse) -> Self {
        Self {
            id: resp.id,
            ttl: resp.ttl,
            granted_ttl: resp.granted_ttl,
            keys: resp.keys,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventType,
    /// For deletions only the key and the deletion revision are set.
    pub kv: KeyValue,
}

impl From<mvccpb::Event> for Event {
    fn from(event: mvccpb::Event) -> Self {
        Self {
            kind: event.r#type(),
            kv: event.kv.map(KeyValue::from).unwrap_or_default(),
        }
    }
}
