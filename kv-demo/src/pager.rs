use etcd_kv::{Client, GetOptions, KeyValue, SortOrder, SortTarget, prefix_end};

/// Walks every key under a prefix in ascending key order, one page at a time.
///
/// The first page is a plain sorted, limited prefix read. Each following page
/// starts at the last key already returned (inclusive) and asks for one extra
/// entry; the boundary entry is dropped when the store returns it again. A
/// store that treats the start key as exclusive therefore neither repeats nor
/// skips a key.
pub struct Pager<'a> {
    client: &'a Client,
    prefix: Vec<u8>,
    end: Vec<u8>,
    page_size: i64,
    last_key: Option<Vec<u8>>,
    done: bool,
}

impl<'a> Pager<'a> {
    pub fn new(client: &'a Client, prefix: impl Into<Vec<u8>>, page_size: i64) -> Self {
        let prefix = prefix.into();
        Self {
            client,
            end: prefix_end(&prefix),
            prefix,
            page_size: page_size.max(1),
            last_key: None,
            done: false,
        }
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<KeyValue>>, etcd_kv::Error> {
        if self.done {
            return Ok(None);
        }

        let sorted = GetOptions::new().with_sort(SortTarget::Key, SortOrder::Ascend);
        let resp = match &self.last_key {
            None => {
                let options = sorted.with_prefix().with_limit(self.page_size);
                self.client.get(self.prefix.clone(), Some(options)).await?
            }
            Some(last) => {
                let options = sorted
                    .with_range(self.end.clone())
                    .with_limit(self.page_size + 1);
                self.client.get(last.clone(), Some(options)).await?
            }
        };

        let mut page = resp.kvs;
        let mut more = resp.more;
        if let Some(last) = &self.last_key {
            if page.first().map(|kv| &kv.key) == Some(last) {
                page.remove(0);
            }
        }
        if page.len() as i64 > self.page_size {
            page.truncate(self.page_size as usize);
            more = true;
        }

        match page.last() {
            Some(kv) => self.last_key = Some(kv.key.clone()),
            None => {
                self.done = true;
                return Ok(None);
            }
        }
        if !more {
            self.done = true;
        }

        Ok(Some(page))
    }
}
