//! Order status enumeration and the transition relation the pipeline is
//! allowed to follow.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Lifecycle status of an order.
///
/// The pipeline drives `NEW → QUEUED → PROCESSING → CMS → ROS → WMS →
/// READY_FOR_DRIVER`. Stage failures land on the matching `*_ERROR` (or
/// `FAILED` when the error cannot be attributed) and re-enter at
/// `PROCESSING` on retry, until the retry budget parks the order in `DLQ`.
/// `DELIVERED` and `FAILED` are also produced by the out-of-scope driver
/// flow after handover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Queued,
    Processing,
    CmsCalling,
    CmsOk,
    CmsError,
    RosCalling,
    RosOk,
    RosError,
    WmsCalling,
    WmsOk,
    WmsError,
    ReadyForDriver,
    Dlq,
    Delivered,
    Failed,
}

impl OrderStatus {
    /// Wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Queued => "QUEUED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::CmsCalling => "CMS_CALLING",
            OrderStatus::CmsOk => "CMS_OK",
            OrderStatus::CmsError => "CMS_ERROR",
            OrderStatus::RosCalling => "ROS_CALLING",
            OrderStatus::RosOk => "ROS_OK",
            OrderStatus::RosError => "ROS_ERROR",
            OrderStatus::WmsCalling => "WMS_CALLING",
            OrderStatus::WmsOk => "WMS_OK",
            OrderStatus::WmsError => "WMS_ERROR",
            OrderStatus::ReadyForDriver => "READY_FOR_DRIVER",
            OrderStatus::Dlq => "DLQ",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Failed => "FAILED",
        }
    }

    /// States from which this pipeline performs no further transitions.
    /// A delivery for an order already in one of these is skip-acked.
    /// `FAILED` is not in this set: an unattributable failure retries and
    /// dead-letters exactly like the `*_ERROR` statuses.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            OrderStatus::ReadyForDriver | OrderStatus::Dlq | OrderStatus::Delivered
        )
    }

    /// The stage-failure statuses that bump `retry_count`.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            OrderStatus::CmsError
                | OrderStatus::RosError
                | OrderStatus::WmsError
                | OrderStatus::Failed
        )
    }

    /// Whether the state machine permits `self → next`.
    ///
    /// Any non-done state may re-enter `PROCESSING`: a crash between a
    /// stage transition and the broker ack leaves the order mid-flight,
    /// and the redelivered event restarts the pipeline from the top.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if next == Processing {
            return !self.is_done();
        }

        match (self, next) {
            (New, Queued) => true,
            (Processing, CmsCalling) => true,
            (CmsCalling, CmsOk) | (CmsCalling, CmsError) | (CmsCalling, Failed) => true,
            (CmsOk, RosCalling) => true,
            (RosCalling, RosOk) | (RosCalling, RosError) | (RosCalling, Failed) => true,
            (RosOk, WmsCalling) => true,
            (WmsCalling, WmsOk) | (WmsCalling, WmsError) | (WmsCalling, Failed) => true,
            (WmsOk, ReadyForDriver) => true,
            (CmsError, Dlq) | (RosError, Dlq) | (WmsError, Dlq) | (Failed, Dlq) => true,
            // Out-of-scope driver flow after handover.
            (ReadyForDriver, Delivered) | (ReadyForDriver, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NEW" => OrderStatus::New,
            "QUEUED" => OrderStatus::Queued,
            "PROCESSING" => OrderStatus::Processing,
            "CMS_CALLING" => OrderStatus::CmsCalling,
            "CMS_OK" => OrderStatus::CmsOk,
            "CMS_ERROR" => OrderStatus::CmsError,
            "ROS_CALLING" => OrderStatus::RosCalling,
            "ROS_OK" => OrderStatus::RosOk,
            "ROS_ERROR" => OrderStatus::RosError,
            "WMS_CALLING" => OrderStatus::WmsCalling,
            "WMS_OK" => OrderStatus::WmsOk,
            "WMS_ERROR" => OrderStatus::WmsError,
            "READY_FOR_DRIVER" => OrderStatus::ReadyForDriver,
            "DLQ" => OrderStatus::Dlq,
            "DELIVERED" => OrderStatus::Delivered,
            "FAILED" => OrderStatus::Failed,
            other => return Err(StoreError::UnknownStatus(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_statuses() {
        let all = [
            OrderStatus::New,
            OrderStatus::Queued,
            OrderStatus::Processing,
            OrderStatus::CmsCalling,
            OrderStatus::CmsOk,
            OrderStatus::CmsError,
            OrderStatus::RosCalling,
            OrderStatus::RosOk,
            OrderStatus::RosError,
            OrderStatus::WmsCalling,
            OrderStatus::WmsOk,
            OrderStatus::WmsError,
            OrderStatus::ReadyForDriver,
            OrderStatus::Dlq,
            OrderStatus::Delivered,
            OrderStatus::Failed,
        ];

        for status in all {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(matches!(
            "SHIPPED".parse::<OrderStatus>(),
            Err(StoreError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_happy_path_transitions_allowed() {
        use OrderStatus::*;
        let path = [
            New,
            Queued,
            Processing,
            CmsCalling,
            CmsOk,
            RosCalling,
            RosOk,
            WmsCalling,
            WmsOk,
            ReadyForDriver,
        ];

        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_error_retry_and_dlq_paths() {
        use OrderStatus::*;

        for error in [CmsError, RosError, WmsError, Failed] {
            assert!(error.can_transition_to(Processing));
            assert!(error.can_transition_to(Dlq));
        }

        // Crash-replay re-entry from any mid-flight state.
        for mid in [Queued, CmsOk, RosCalling, WmsCalling] {
            assert!(mid.can_transition_to(Processing));
        }
    }

    #[test]
    fn test_forbidden_transitions() {
        use OrderStatus::*;

        // No skipping stages.
        assert!(!Processing.can_transition_to(RosCalling));
        assert!(!CmsOk.can_transition_to(WmsCalling));
        // No retrograde from done states.
        assert!(!ReadyForDriver.can_transition_to(Processing));
        assert!(!Dlq.can_transition_to(Processing));
        assert!(!Delivered.can_transition_to(Processing));
        // Terminal park stays parked.
        assert!(!Dlq.can_transition_to(Queued));
    }

    #[test]
    fn test_done_set_matches_skip_gate() {
        use OrderStatus::*;
        for status in [ReadyForDriver, Dlq, Delivered] {
            assert!(status.is_done());
        }
        // FAILED stays retryable, like the stage errors.
        for status in [New, Queued, Processing, CmsError, WmsCalling, Failed] {
            assert!(!status.is_done());
        }
    }
}
