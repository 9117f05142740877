pub(crate) fn join_path(parts: &[&str]) -> String {
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(&["/assignments", "logs-0"]), "/assignments/logs-0");
        assert_eq!(join_path(&["/clients", "12"]), "/clients/12");
    }
}
