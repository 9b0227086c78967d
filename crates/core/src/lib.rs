pub mod audit_trail;
pub mod confirmation;
pub mod connection;
pub mod connection_profile;
pub mod executor;
pub mod pipeline;
pub mod query_spec;
pub mod result_pane;
pub mod settings;
pub mod statement_builder;
pub mod validator;

#[must_use]
pub fn domain_name() -> &'static str {
    "sqlform-core"
}

#[cfg(test)]
mod tests {
    use super::domain_name;

    #[test]
    fn domain_name_is_stable() {
        assert_eq!(domain_name(), "sqlform-core");
    }
}
