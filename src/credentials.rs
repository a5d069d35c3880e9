use std::collections::HashMap;

use transaction::collaborators::CredentialsRegistry;

/// Static username/key table, looked up by the request validation pipeline
/// before a request is delivered.
pub struct StaticCredentials {
    users: HashMap<String, Vec<u8>>,
}

impl StaticCredentials {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users: users.into_iter().map(|(k, v)| (k, v.into_bytes())).collect() }
    }
}

impl CredentialsRegistry for StaticCredentials {
    fn local_key(&self, username: &str) -> Option<Vec<u8>> {
        self.users.get(username).cloned()
    }

    fn check_local_username(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_keys_by_exact_username() {
        let mut users = HashMap::new();
        users.insert("alice".to_string(), "secret".to_string());
        let registry = StaticCredentials::new(users);

        assert!(registry.check_local_username("alice"));
        assert_eq!(registry.local_key("alice"), Some(b"secret".to_vec()));
        assert!(!registry.check_local_username("bob"));
        assert_eq!(registry.local_key("bob"), None);
    }
}
