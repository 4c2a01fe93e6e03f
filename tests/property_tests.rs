use proptest::prelude::*;

use repairhub_api::entities::{repair_order::RepairStatus, stock_count::StockCountStatus};

fn arb_repair_status() -> impl Strategy<Value = RepairStatus> {
    prop::sample::select(RepairStatus::ALL.to_vec())
}

fn arb_count_status() -> impl Strategy<Value = StockCountStatus> {
    prop::sample::select(StockCountStatus::ALL.to_vec())
}

proptest! {
    #[test]
    fn terminal_repair_statuses_have_no_outgoing_transitions(status in arb_repair_status()) {
        if status.is_terminal() {
            prop_assert!(status.allowed_targets().is_empty());
        } else {
            prop_assert!(!status.allowed_targets().is_empty());
        }
    }

    #[test]
    fn repair_transitions_are_irreflexive(status in arb_repair_status()) {
        prop_assert!(!status.can_transition_to(status));
    }

    #[test]
    fn repair_status_strings_round_trip(status in arb_repair_status()) {
        prop_assert_eq!(RepairStatus::from_str(status.as_str()), Some(status));
    }

    #[test]
    fn every_active_repair_can_be_put_on_hold(status in arb_repair_status()) {
        if !status.is_terminal() && status != RepairStatus::OnHold {
            prop_assert!(status.can_transition_to(RepairStatus::OnHold));
        }
    }

    #[test]
    fn repair_transition_targets_are_never_the_source(status in arb_repair_status()) {
        for target in status.allowed_targets() {
            prop_assert_ne!(*target, status);
        }
    }

    #[test]
    fn terminal_count_statuses_have_no_outgoing_transitions(status in arb_count_status()) {
        if status.is_terminal() {
            prop_assert!(status.allowed_targets().is_empty());
        } else {
            prop_assert!(!status.allowed_targets().is_empty());
        }
    }

    #[test]
    fn count_transitions_are_irreflexive(status in arb_count_status()) {
        prop_assert!(!status.can_transition_to(status));
    }

    #[test]
    fn count_status_strings_round_trip(status in arb_count_status()) {
        prop_assert_eq!(StockCountStatus::from_str(status.as_str()), Some(status));
    }

    #[test]
    fn every_open_count_can_be_cancelled(status in arb_count_status()) {
        if !status.is_terminal() {
            prop_assert!(status.can_transition_to(StockCountStatus::Cancelled));
        }
    }

    #[test]
    fn items_are_only_accepted_before_review(status in arb_count_status()) {
        let open = matches!(
            status,
            StockCountStatus::Scheduled | StockCountStatus::InProgress
        );
        prop_assert_eq!(status.accepts_items(), open);
    }
}
