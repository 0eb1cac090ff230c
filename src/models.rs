use chrono::Utc;
use etcd_api_types::mvccpb::{event::EventType, Event, KeyValue};

/// One row of the revision history.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct KeyRecord {
    pub revision: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub create_revision: i64,
    pub version: i64,
    pub lease: i64,
    pub tombstone: bool,
}

impl KeyRecord {
    pub fn to_key_value(&self) -> KeyValue {
        if self.tombstone {
            return KeyValue {
                key: self.key.clone(),
                mod_revision: self.revision,
                ..Default::default()
            };
        }

        KeyValue {
            key: self.key.clone(),
            create_revision: self.create_revision,
            mod_revision: self.revision,
            version: self.version,
            value: self.value.clone(),
            lease: self.lease,
        }
    }

    pub fn to_event(&self) -> Event {
        let kind = if self.tombstone {
            EventType::Delete
        } else {
            EventType::Put
        };

        Event {
            r#type: kind as i32,
            kv: Some(self.to_key_value()),
            prev_kv: None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeaseRecord {
    pub id: i64,
    pub ttl: i64,
    pub granted_at: i64,
}

impl LeaseRecord {
    pub fn expires_at(&self) -> i64 {
        self.granted_at + self.ttl * 1000
    }

    /// Seconds left before expiry, rounded up, never negative.
    pub fn remaining(&self, now: i64) -> i64 {
        let left = self.expires_at() - now;
        if left <= 0 { 0 } else { (left + 999) / 1000 }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at() <= now
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Key selection of a request, decoded from etcd's `key`/`range_end` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRange {
    Single(Vec<u8>),
    /// Every key `>= start`.
    From(Vec<u8>),
    /// `[start, end)`.
    Between(Vec<u8>, Vec<u8>),
}

impl KeyRange {
    pub fn new(key: Vec<u8>, range_end: Vec<u8>) -> Self {
        if range_end.is_empty() {
            KeyRange::Single(key)
        } else if range_end == [0] {
            KeyRange::From(key)
        } else {
            KeyRange::Between(key, range_end)
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        match self {
            KeyRange::Single(k) => k.as_slice() == key,
            KeyRange::From(start) => key >= start.as_slice(),
            KeyRange::Between(start, end) => key >= start.as_slice() && key < end.as_slice(),
        }
    }
}
