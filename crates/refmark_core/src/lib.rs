pub mod db;
pub mod domain;
pub mod error;
pub mod store;
pub mod workspace;

#[cfg(test)]
mod tests {
    use super::error::AppError;

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new("PERSIST_WRITE_FAILED", "write failed").with_retryable(true);
        assert_eq!(err.code, "PERSIST_WRITE_FAILED");
        assert_eq!(err.message, "write failed");
        assert_eq!(err.retryable, true);
    }
}
