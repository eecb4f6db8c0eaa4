//! Failure classification.
//!
//! Stage failures are attributed by matching the error text against
//! backend keywords, the same heuristic the audit trail and operators
//! use. Anything unattributable degrades to `FAILED`.

use order_store::OrderStatus;

/// Map an error's text to the stage-failure status it belongs to.
pub fn classify_failure(error_text: &str) -> OrderStatus {
    let lower = error_text.to_lowercase();

    if lower.contains("soap") || lower.contains("cms") {
        OrderStatus::CmsError
    } else if lower.contains("ros") || lower.contains("optimize") || lower.contains("route") {
        OrderStatus::RosError
    } else if lower.contains("wms") || lower.contains("socket") || lower.contains("tcp") {
        OrderStatus::WmsError
    } else {
        OrderStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterError;

    #[test]
    fn test_keyword_classification() {
        assert_eq!(
            classify_failure("cms soap request failed: 502 Bad Gateway"),
            OrderStatus::CmsError
        );
        assert_eq!(
            classify_failure("ROS returned garbage"),
            OrderStatus::RosError
        );
        assert_eq!(
            classify_failure("could not optimize delivery"),
            OrderStatus::RosError
        );
        assert_eq!(
            classify_failure("tcp connect refused"),
            OrderStatus::WmsError
        );
        assert_eq!(
            classify_failure("socket closed unexpectedly"),
            OrderStatus::WmsError
        );
        assert_eq!(classify_failure("out of memory"), OrderStatus::Failed);
    }

    #[test]
    fn test_adapter_errors_classify_to_their_stage() {
        let cases = [
            (AdapterError::Cms("timeout".into()), OrderStatus::CmsError),
            (AdapterError::Ros("500".into()), OrderStatus::RosError),
            (AdapterError::Wms("refused".into()), OrderStatus::WmsError),
        ];

        for (err, expected) in cases {
            assert_eq!(classify_failure(&err.to_string()), expected);
        }
    }
}
