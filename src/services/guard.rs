/// Keeps mutating container actions away from the platform's own stack.
#[derive(Debug, Clone)]
pub struct ProtectedTargetGuard {
    marker: String,
}

impl ProtectedTargetGuard {
    pub fn new(reserved_name: &str) -> Self {
        Self {
            marker: reserved_name.trim().to_lowercase(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Case-insensitive substring match. An empty marker protects nothing.
    pub fn is_protected(&self, container_name: &str) -> bool {
        if self.marker.is_empty() {
            return false;
        }
        container_name.to_lowercase().contains(&self.marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_any_casing_and_position() {
        let guard = ProtectedTargetGuard::new("HostCtl");
        assert!(guard.is_protected("hostctl-api"));
        assert!(guard.is_protected("/prod_HOSTCTL_db"));
        assert!(!guard.is_protected("customer-web"));
    }

    #[test]
    fn empty_marker_protects_nothing() {
        assert!(!ProtectedTargetGuard::new("  ").is_protected("anything"));
    }
}
