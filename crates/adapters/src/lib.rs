pub mod any_driver;
pub mod export;
pub mod mysql;
pub mod secrets;
pub mod sqlite;

#[must_use]
pub fn adapter_name() -> &'static str {
    "sqlform-adapters"
}

#[cfg(test)]
mod tests {
    use super::adapter_name;

    #[test]
    fn adapter_name_is_stable() {
        assert_eq!(adapter_name(), "sqlform-adapters");
    }
}
