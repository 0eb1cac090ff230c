//! Request options, modeled on the clientv3 `OpOption`s.

use etcd_api_types::etcdserverpb::{
    DeleteRangeRequest, PutRequest, RangeRequest, WatchCreateRequest,
    watch_create_request::FilterType,
};

pub use etcd_api_types::etcdserverpb::range_request::{SortOrder, SortTarget};

/// Returns the exclusive upper bound of the range holding every key that
/// starts with `prefix`.
///
/// Trailing `0xff` bytes cannot be incremented and are dropped; a prefix made
/// only of them has no upper bound, encoded as `"\0"`.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    vec![0]
}

/// How a request extends its key into a range. The last option applied wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum RangeEnd {
    #[default]
    Single,
    Prefix,
    FromKey,
    End(Vec<u8>),
}

impl RangeEnd {
    fn apply(&self, key: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
        match self {
            RangeEnd::Single => (key, Vec::new()),
            RangeEnd::Prefix if key.is_empty() => (vec![0], vec![0]),
            RangeEnd::Prefix => {
                let end = prefix_end(&key);
                (key, end)
            }
            RangeEnd::FromKey if key.is_empty() => (vec![0], vec![0]),
            RangeEnd::FromKey => (key, vec![0]),
            RangeEnd::End(end) => (key, end.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    range: RangeEnd,
    revision: i64,
    limit: i64,
    sort: Option<(SortTarget, SortOrder)>,
    keys_only: bool,
    count_only: bool,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the store as of `revision` instead of the latest state.
    pub fn with_revision(mut self, revision: i64) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_prefix(mut self) -> Self {
        self.range = RangeEnd::Prefix;
        self
    }

    /// Every key greater than or equal to the requested key.
    pub fn with_from_key(mut self) -> Self {
        self.range = RangeEnd::FromKey;
        self
    }

    /// `[key, end)`.
    pub fn with_range(mut self, end: impl Into<Vec<u8>>) -> Self {
        self.range = RangeEnd::End(end.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_sort(mut self, target: SortTarget, order: SortOrder) -> Self {
        self.sort = Some((target, order));
        self
    }

    pub fn with_keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    pub fn with_count_only(mut self) -> Self {
        self.count_only = true;
        self
    }

    pub(crate) fn into_request(self, key: Vec<u8>) -> RangeRequest {
        let (key, range_end) = self.range.apply(key);
        let mut request = RangeRequest {
            key,
            range_end,
            limit: self.limit,
            revision: self.revision,
            keys_only: self.keys_only,
            count_only: self.count_only,
            ..Default::default()
        };
        if let Some((target, order)) = self.sort {
            request.set_sort_target(target);
            request.set_sort_order(order);
        }
        request
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    lease: i64,
    prev_kv: bool,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the key to a lease; the store deletes it when the lease expires.
    pub fn with_lease(mut self, lease: i64) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_prev_kv(mut self) -> Self {
        self.prev_kv = true;
        self
    }

    pub(crate) fn into_request(self, key: Vec<u8>, value: Vec<u8>) -> PutRequest {
        PutRequest {
            key,
            value,
            lease: self.lease,
            prev_kv: self.prev_kv,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    range: RangeEnd,
    prev_kv: bool,
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self) -> Self {
        self.range = RangeEnd::Prefix;
        self
    }

    pub fn with_from_key(mut self) -> Self {
        self.range = RangeEnd::FromKey;
        self
    }

    pub fn with_range(mut self, end: impl Into<Vec<u8>>) -> Self {
        self.range = RangeEnd::End(end.into());
        self
    }

    pub fn with_prev_kv(mut self) -> Self {
        self.prev_kv = true;
        self
    }

    pub(crate) fn into_request(self, key: Vec<u8>) -> DeleteRangeRequest {
        let (key, range_end) = self.range.apply(key);
        DeleteRangeRequest {
            key,
            range_end,
            prev_kv: self.prev_kv,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    range: RangeEnd,
    start_revision: i64,
    no_put: bool,
    no_delete: bool,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self) -> Self {
        self.range = RangeEnd::Prefix;
        self
    }

    /// Replays history starting at `revision`. Zero watches future changes only.
    pub fn with_start_revision(mut self, revision: i64) -> Self {
        self.start_revision = revision;
        self
    }

    /// Drops put events.
    pub fn with_filter_put(mut self) -> Self {
        self.no_put = true;
        self
    }

    /// Drops delete events.
    pub fn with_filter_delete(mut self) -> Self {
        self.no_delete = true;
        self
    }

    pub(crate) fn into_request(self, key: Vec<u8>) -> WatchCreateRequest {
        let (key, range_end) = self.range.apply(key);
        let mut filters = Vec::new();
        if self.no_put {
            filters.push(FilterType::Noput as i32);
        }
        if self.no_delete {
            filters.push(FilterType::Nodelete as i32);
        }

        WatchCreateRequest {
            key,
            range_end,
            start_revision: self.start_revision,
            filters,
            ..Default::default()
        }
    }
}
