#[cfg(test)]
mod unit_tests {
    use crate::utils::{format_duration, format_offset, measure_time, NetworkError, TestResult};
    use std::time::Duration;

    #[test]
    fn test_format_duration_milliseconds() {
        let duration = Duration::from_millis(500);
        assert_eq!(format_duration(duration), "500ms");
    }

    #[test]
    fn test_format_duration_seconds() {
        let duration = Duration::from_millis(1500);
        assert_eq!(format_duration(duration), "1.50s");
    }

    #[test]
    fn test_format_offset_signed() {
        assert_eq!(format_offset(chrono::Duration::milliseconds(-250)), "-250ms");
        assert_eq!(format_offset(chrono::Duration::milliseconds(42)), "+42ms");
        assert_eq!(format_offset(chrono::Duration::milliseconds(2500)), "+2.50s");
    }

    #[test]
    fn test_test_result_new() {
        let result = TestResult::new("test_name".to_string());
        assert_eq!(result.test_name, "test_name");
        assert!(!result.success);
        assert_eq!(result.duration, Duration::ZERO);
        assert!(result.details.is_empty());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_test_result_failure() {
        let duration = Duration::from_millis(200);
        let result = TestResult::new("test".to_string()).failure(duration, NetworkError::Timeout);

        assert!(!result.success);
        assert_eq!(result.duration, duration);
        assert!(result.details.is_empty());
        assert!(matches!(result.error, Some(NetworkError::Timeout)));
    }

    #[test]
    fn test_test_result_negative_keeps_details() {
        let result = TestResult::new("port 22".to_string())
            .negative(Duration::from_millis(10), "closed".to_string());

        assert!(!result.success);
        assert_eq!(result.details, "closed");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_cancelled_is_distinguishable() {
        assert!(NetworkError::Cancelled.is_cancelled());
        assert!(!NetworkError::Timeout.is_cancelled());
    }

    #[tokio::test]
    async fn test_measure_time() {
        let (duration, result) = measure_time(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            "test_result"
        })
        .await;

        assert!(duration >= Duration::from_millis(90));
        assert_eq!(result, "test_result");
    }
}
