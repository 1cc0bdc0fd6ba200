//! Hostname derivation rules.
//!
//! Underscores are valid in our ids but not in hostnames, so the cell id is
//! dashified before it becomes a DNS label.

/// Hostname of a cell: `{cellId}.up.{apex}` with `_` replaced by `-`.
#[must_use]
pub fn cell_host(cell_id: &str, apex: &str) -> String {
    format!("{}.up.{}", cell_id.replace('_', "-"), apex)
}

/// The wildcard hostname covering every app route in a cell.
#[must_use]
pub fn wildcard_host(cell_id: &str, apex: &str) -> String {
    format!("*.{}", cell_host(cell_id, apex))
}

/// Hostname of a cell's private registry.
#[must_use]
pub fn registry_host(cell_id: &str, apex: &str) -> String {
    format!("registry.{}", cell_host(cell_id, apex))
}

/// Hostname of a server's control-plane endpoint.
#[must_use]
pub fn server_host(server_id: &str, apex: &str) -> String {
    format!("{server_id}.{apex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underscores_become_dashes_in_cell_host() {
        assert_eq!(
            cell_host("cell_01jabc", "example.dev"),
            "cell-01jabc.up.example.dev"
        );
    }

    #[test]
    fn wildcard_and_registry_share_the_cell_host() {
        assert_eq!(
            wildcard_host("cell_01jabc", "example.dev"),
            "*.cell-01jabc.up.example.dev"
        );
        assert_eq!(
            registry_host("cell_01jabc", "example.dev"),
            "registry.cell-01jabc.up.example.dev"
        );
    }

    #[test]
    fn server_host_is_directly_under_apex() {
        assert_eq!(
            server_host("server_01jxyz", "example.dev"),
            "server_01jxyz.example.dev"
        );
    }
}
