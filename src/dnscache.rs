use parking_lot::Mutex;
use std::collections::HashMap;

/// Which resolver family discovered an address (OR-combinable).
pub const FLAG_SYSTEM_RESOLVER: i64 = 1 << 0;
pub const FLAG_UDP: i64 = 1 << 1;
pub const FLAG_HTTPS: i64 = 1 << 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsEntry {
    pub addr: String,
    pub flags: i64,
}

/// Domain -> discovered addresses for one measurement
#[derive(Debug, Default)]
pub struct DnsCache {
    entries: Mutex<HashMap<String, Vec<DnsEntry>>>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, domain: &str) -> Option<Vec<DnsEntry>> {
        self.entries.lock().get(domain).cloned()
    }

    /// Last write wins for a given domain
    pub fn set(&self, domain: &str, entries: Vec<DnsEntry>) {
        self.entries.lock().insert(domain.to_string(), entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let cache = DnsCache::new();
        assert!(cache.get("example.com").is_none());

        let entries = vec![
            DnsEntry { addr: "93.184.216.34".into(), flags: FLAG_SYSTEM_RESOLVER | FLAG_UDP },
            DnsEntry { addr: "2606:2800:220:1::".into(), flags: FLAG_HTTPS },
        ];
        cache.set("example.com", entries.clone());
        assert_eq!(cache.get("example.com"), Some(entries));

        cache.set("example.com", vec![]);
        assert_eq!(cache.get("example.com"), Some(vec![]));
    }
}
