//! Shared test utilities and arbitrary generators for property-based testing.

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use crate::error::{ErrorKind, TaskFailure};
use crate::types::{
    ContentHash, DraftId, EmulationRunId, FeatureId, FeatureRecord, FeatureType, ScenarioDraft,
    ScenarioId, ScenarioRecord, TaskPayload, TestRunId,
};

pub fn arb_datetime() -> impl Strategy<Value = DateTime<Utc>> {
    // Year 2000-2100, whole seconds so JSON round trips compare equal.
    (946684800i64..4102444800i64).prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap())
}

pub fn arb_scenario_id() -> impl Strategy<Value = ScenarioId> {
    "[A-Z][A-Z0-9]{0,8}".prop_map(ScenarioId::new)
}

pub fn arb_branch_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9/-]{0,30}".prop_map(String::from)
}

pub fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
    prop_oneof![
        Just(ErrorKind::TransientInfra),
        Just(ErrorKind::AuthBackendUnavailable),
        Just(ErrorKind::AuthRequestRejected),
        Just(ErrorKind::ReviewSubmissionRejected),
        Just(ErrorKind::AlreadyPublished),
        Just(ErrorKind::DataIntegrity),
        Just(ErrorKind::InvalidTask),
        Just(ErrorKind::ExecutionFailed),
    ]
}

pub fn arb_task_failure() -> impl Strategy<Value = TaskFailure> {
    (arb_error_kind(), "[a-zA-Z0-9 ]{1,60}").prop_map(|(kind, msg)| TaskFailure::new(kind, msg))
}

pub fn arb_task_payload() -> impl Strategy<Value = TaskPayload> {
    prop_oneof![
        any::<u64>().prop_map(|n| TaskPayload::RunTests {
            test_run_id: TestRunId(n)
        }),
        any::<u64>().prop_map(|n| TaskPayload::RunEmulation {
            emulation_run_id: EmulationRunId(n)
        }),
        (arb_scenario_id(), arb_branch_name()).prop_map(|(scenario_id, target_branch)| {
            TaskPayload::PublishFeature {
                scenario_id,
                target_branch,
            }
        }),
    ]
}

fn arb_tags() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("@[a-z_]{1,10}", 0..3)
}

pub fn arb_scenario_record() -> impl Strategy<Value = ScenarioRecord> {
    ("[A-Za-z ]{1,30}", arb_tags(), "[A-Za-z \n]{0,80}")
        .prop_map(|(name, tags, text)| ScenarioRecord { name, tags, text })
}

pub fn arb_feature_record() -> impl Strategy<Value = FeatureRecord> {
    (
        1u64..10_000,
        "[a-z]{1,8}/[a-z_]{1,12}\\.feature",
        "[a-z]{1,8}",
        "[A-Za-z ]{1,30}",
        arb_tags(),
        prop::collection::vec(arb_scenario_record(), 0..4),
        arb_datetime(),
    )
        .prop_map(
            |(id, file_path, feature_type, name, tags, scenarios, updated_at)| FeatureRecord {
                id: FeatureId(id),
                content_hash: ContentHash::of(&file_path),
                file_path,
                feature_type: FeatureType::new(feature_type),
                name,
                tags,
                scenarios,
                updated_at,
            },
        )
}

pub fn arb_scenario_draft() -> impl Strategy<Value = ScenarioDraft> {
    (
        arb_scenario_id(),
        any::<u64>(),
        "[A-Za-z ]{1,30}",
        "Feature: [A-Za-z ]{1,30}",
        "[a-z]{1,10}",
        prop::collection::vec("[a-z]{1,10}", 0..3),
    )
        .prop_map(
            |(scenario_id, draft_id, title, feature_text, author, reviewers)| ScenarioDraft {
                scenario_id,
                draft_id: DraftId(draft_id),
                title,
                feature_text,
                author,
                reviewers,
            },
        )
}

/// A draft with fixed, readable content.
pub fn sample_draft(scenario_id: &str, draft_id: u64) -> ScenarioDraft {
    ScenarioDraft {
        scenario_id: ScenarioId::new(scenario_id),
        draft_id: DraftId(draft_id),
        title: format!("Scenario {scenario_id}"),
        feature_text: "Feature: Login\n  Scenario: ok\n    Given a user\n".to_string(),
        author: "alice".to_string(),
        reviewers: vec!["bob".to_string()],
    }
}
