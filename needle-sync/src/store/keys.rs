//! Store key layout, namespaced by subsystem

use crate::services::upstream::Service;

pub fn rate_limit(service: Service) -> String {
    format!("ratelimit:{}", service.as_str())
}

pub fn sync_cooldown(user_id: &str) -> String {
    format!("sync:cooldown:{}", user_id)
}

pub fn collection_snapshot(user_id: &str) -> String {
    format!("collection:snapshot:{}", user_id)
}

pub fn enrich_progress(user_id: &str) -> String {
    format!("enrich:progress:{}", user_id)
}

pub fn enrich_lock(user_id: &str) -> String {
    format!("enrich:lock:{}", user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(rate_limit(Service::Collection), "ratelimit:collection");
        assert_eq!(sync_cooldown("u1"), "sync:cooldown:u1");
        assert_eq!(collection_snapshot("u1"), "collection:snapshot:u1");
        assert_eq!(enrich_progress("u1"), "enrich:progress:u1");
        assert_eq!(enrich_lock("u1"), "enrich:lock:u1");
    }
}
