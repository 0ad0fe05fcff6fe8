//! Connection statistics for a frontend server.
//!
//! The registry answers "how many clients are connected, and who is
//! logged in?". The connector is its only writer: +1 per admitted
//! connection, -1 per closed session, one login record per bound uid.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRecord {
    pub uid: String,
    /// Milliseconds since the Unix epoch.
    pub login_time: u64,
    /// `ip:port` of the client.
    pub address: String,
}

impl LoginRecord {
    /// A record stamped with the current wall-clock time.
    pub fn now(uid: impl Into<String>, address: impl Into<String>) -> Self {
        let login_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            uid: uid.into(),
            login_time,
            address: address.into(),
        }
    }
}

/// Snapshot returned by [`ConnectionRegistry::statistics_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsInfo {
    pub server_id: String,
    pub total_conn_count: usize,
    pub logged_in_count: usize,
    pub logged_in_list: Vec<LoginRecord>,
}

/// Connection statistics store.
pub trait ConnectionRegistry: Send + Sync + 'static {
    fn increase_connection_count(&self);

    /// Drops one connection and, if it was bound, its login record.
    fn decrease_connection_count(&self, uid: Option<&str>);

    fn add_logged_in_user(&self, uid: &str, record: LoginRecord);

    fn remove_logged_in_user(&self, uid: &str);

    fn statistics_info(&self) -> StatisticsInfo;

    /// Current number of counted connections.
    fn connection_count(&self) -> usize {
        self.statistics_info().total_conn_count
    }
}

#[derive(Default)]
struct Counters {
    conn_count: usize,
    logged_in: HashMap<String, LoginRecord>,
}

/// In-memory [`ConnectionRegistry`].
pub struct ConnectionStats {
    server_id: String,
    counters: Mutex<Counters>,
}

impl ConnectionStats {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            counters: Mutex::new(Counters::default()),
        }
    }
}

impl ConnectionRegistry for ConnectionStats {
    fn increase_connection_count(&self) {
        self.counters.lock().conn_count += 1;
    }

    fn decrease_connection_count(&self, uid: Option<&str>) {
        let mut counters = self.counters.lock();
        counters.conn_count = counters.conn_count.saturating_sub(1);
        if let Some(uid) = uid {
            counters.logged_in.remove(uid);
        }
    }

    fn add_logged_in_user(&self, uid: &str, record: LoginRecord) {
        self.counters.lock().logged_in.insert(uid.to_string(), record);
    }

    fn remove_logged_in_user(&self, uid: &str) {
        self.counters.lock().logged_in.remove(uid);
    }

    fn statistics_info(&self) -> StatisticsInfo {
        let counters = self.counters.lock();
        let mut logged_in_list: Vec<LoginRecord> = counters.logged_in.values().cloned().collect();
        logged_in_list.sort_by(|a, b| a.uid.cmp(&b.uid));
        StatisticsInfo {
            server_id: self.server_id.clone(),
            total_conn_count: counters.conn_count,
            logged_in_count: counters.logged_in.len(),
            logged_in_list,
        }
    }

    fn connection_count(&self) -> usize {
        self.counters.lock().conn_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increase_and_decrease_track_total() {
        let stats = ConnectionStats::new("connector-1");
        stats.increase_connection_count();
        stats.increase_connection_count();
        stats.decrease_connection_count(None);

        let info = stats.statistics_info();
        assert_eq!(info.total_conn_count, 1);
        assert_eq!(info.server_id, "connector-1");
        assert_eq!(stats.connection_count(), 1);
    }

    #[test]
    fn test_decrease_never_underflows() {
        let stats = ConnectionStats::new("connector-1");
        stats.decrease_connection_count(None);
        assert_eq!(stats.statistics_info().total_conn_count, 0);
    }

    #[test]
    fn test_decrease_with_uid_drops_login_record() {
        let stats = ConnectionStats::new("connector-1");
        stats.increase_connection_count();
        stats.add_logged_in_user("alice", LoginRecord::now("alice", "127.0.0.1:5000"));
        assert_eq!(stats.statistics_info().logged_in_count, 1);

        stats.decrease_connection_count(Some("alice"));

        let info = stats.statistics_info();
        assert_eq!(info.logged_in_count, 0);
        assert!(info.logged_in_list.is_empty());
    }

    #[test]
    fn test_add_logged_in_user_same_uid_counts_once() {
        let stats = ConnectionStats::new("connector-1");
        stats.add_logged_in_user("alice", LoginRecord::now("alice", "10.0.0.1:1"));
        stats.add_logged_in_user("alice", LoginRecord::now("alice", "10.0.0.1:2"));

        let info = stats.statistics_info();
        assert_eq!(info.logged_in_count, 1);
        assert_eq!(info.logged_in_list[0].address, "10.0.0.1:2");
    }

    #[test]
    fn test_statistics_info_serializes_camel_case() {
        let stats = ConnectionStats::new("connector-1");
        let value = serde_json::to_value(stats.statistics_info()).unwrap();
        assert!(value.get("totalConnCount").is_some());
        assert!(value.get("loggedInList").is_some());
    }
}
