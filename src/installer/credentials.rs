use std::collections::HashMap;

use parking_lot::RwLock;

/// Looks up saved FTP passwords.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, host: &str, username: &str) -> Option<String>;

    fn store(&self, host: &str, username: &str, password: &str);
}

/// Keeps passwords for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, host: &str, username: &str) -> Option<String> {
        self.entries
            .read()
            .get(&(host.to_string(), username.to_string()))
            .cloned()
    }

    fn store(&self, host: &str, username: &str, password: &str) {
        self.entries
            .write()
            .insert((host.to_string(), username.to_string()), password.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_by_host_and_user() {
        let store = MemoryCredentialStore::new();
        store.store("10.0.0.2", "anonymous", "secret");

        assert_eq!(store.lookup("10.0.0.2", "anonymous").as_deref(), Some("secret"));
        assert!(store.lookup("10.0.0.2", "root").is_none());
        assert!(store.lookup("10.0.0.3", "anonymous").is_none());

        store.store("10.0.0.2", "anonymous", "changed");
        assert_eq!(store.lookup("10.0.0.2", "anonymous").as_deref(), Some("changed"));
    }
}
