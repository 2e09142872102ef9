//! Task lifecycle and voting integration tests

mod common;

use agentlab::error::AppError;
use agentlab::lifecycle::{TaskEvent, TaskStatus};
use agentlab::models::CritiqueRequest;
use common::{
    add_member, propose, setup_lab, setup_shared_state, setup_state, task_in_voting, test_config,
};
use serde_json::json;
use uuid::Uuid;

fn critique(content: &str) -> CritiqueRequest {
    CritiqueRequest {
        content: content.to_string(),
        severity: Some("minor".to_string()),
        issues: None,
    }
}

#[tokio::test]
async fn test_concurrent_pick_up_has_one_winner() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "race").await;
    let a = add_member(lc, lab.id, "scout").await;
    let b = add_member(lc, lab.id, "scout").await;
    let task = propose(lc, lab.id, pi, "literature_review").await;

    let (ra, rb) = tokio::join!(lc.pick_up(task.id, a), lc.pick_up(task.id, b));

    let (winner, loser) = match (ra, rb) {
        (Ok(t), Err(e)) => ((t, a), e),
        (Err(e), Ok(t)) => ((t, b), e),
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    assert_eq!(winner.0.status, TaskStatus::InProgress);
    assert_eq!(winner.0.assigned_to, Some(winner.1));
    assert!(winner.0.started_at.is_some());
    assert!(matches!(loser, AppError::Conflict(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contended_pick_up_has_one_winner() {
    let (state, _dir) = setup_shared_state(test_config()).await;
    let (lab, pi) = setup_lab(&state.lifecycle, "contended").await;
    let task = propose(&state.lifecycle, lab.id, pi, "literature_review").await;

    let mut scouts = Vec::new();
    for _ in 0..8 {
        scouts.push(add_member(&state.lifecycle, lab.id, "scout").await);
    }

    let task_id = task.id;
    let handles: Vec<_> = scouts
        .iter()
        .map(|&scout| {
            let state = state.clone();
            tokio::spawn(async move { state.lifecycle.pick_up(task_id, scout).await })
        })
        .collect();

    let mut winners = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(task) => winners.push(task),
            Err(AppError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, 7);
    let stored = state.lifecycle.get_task(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::InProgress);
    assert_eq!(stored.assigned_to, winners[0].assigned_to);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contended_votes_resolve_once() {
    let (state, _dir) = setup_shared_state(test_config()).await;
    let (lab, pi) = setup_lab(&state.lifecycle, "ballot").await;
    let mut voters = vec![pi];
    for _ in 0..7 {
        voters.push(add_member(&state.lifecycle, lab.id, "scout").await);
    }
    // 8 active members: quorum 4
    let task = task_in_voting(&state.lifecycle, lab.id, pi).await;

    let task_id = task.id;
    let handles: Vec<_> = voters
        .iter()
        .map(|&voter| {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .lifecycle
                    .vote(task_id, voter, "approve", None)
                    .await
            })
        })
        .collect();

    let mut resolutions = 0;
    let mut closed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) if receipt.resolved => {
                resolutions += 1;
                assert_eq!(receipt.summary.tally.approve, 4);
                assert_eq!(receipt.summary.status, TaskStatus::Accepted);
            }
            Ok(receipt) => assert!(receipt.summary.tally.approve < 4),
            Err(AppError::Conflict(_)) => closed += 1,
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    assert_eq!(resolutions, 1);
    assert_eq!(closed, 4);
    let stored = state.lifecycle.get_task(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Accepted);
    assert!(stored.resolved_at.is_some());
}

#[tokio::test]
async fn test_repeated_pick_up_by_assignee_is_idempotent() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "idempotent").await;
    let scout = add_member(lc, lab.id, "scout").await;
    let task = propose(lc, lab.id, pi, "literature_review").await;

    let first = lc.pick_up(task.id, scout).await.unwrap();
    let second = lc.pick_up(task.id, scout).await.unwrap();
    assert_eq!(first.started_at, second.started_at);
    assert_eq!(second.assigned_to, Some(scout));
}

#[tokio::test]
async fn test_role_gates_pick_up() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "roles").await;
    let critic = add_member(lc, lab.id, "critic").await;
    let task = propose(lc, lab.id, pi, "analysis").await;

    let err = lc.pick_up(task.id, critic).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    // A pi may pick up any task type
    let task = lc.pick_up(task.id, pi).await.unwrap();
    assert_eq!(task.assigned_to, Some(pi));
}

#[tokio::test]
async fn test_non_member_is_forbidden() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "members-only").await;
    let task = propose(lc, lab.id, pi, "analysis").await;

    let err = lc.pick_up(task.id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_left_member_loses_eligibility() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "leavers").await;
    let scout = add_member(lc, lab.id, "scout").await;
    let task = propose(lc, lab.id, pi, "literature_review").await;

    lc.leave_lab(lab.id, scout).await.unwrap();
    let err = lc.pick_up(task.id, scout).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let members = lc.list_members(lab.id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].agent_id, pi);
}

#[tokio::test]
async fn test_illegal_transitions_are_invalid_state() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "legality").await;
    let task = propose(lc, lab.id, pi, "analysis").await;

    let err = lc.complete(task.id, pi, json!({"summary": "x"})).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let err = lc.start_voting(task.id, pi).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let err = lc.vote(task.id, pi, "approve", None).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let err = lc.critique(task.id, pi, critique("too early")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn test_only_assignee_or_pi_completes() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "completion").await;
    let analyst = add_member(lc, lab.id, "research_analyst").await;
    let other = add_member(lc, lab.id, "research_analyst").await;
    let task = propose(lc, lab.id, pi, "analysis").await;
    lc.pick_up(task.id, analyst).await.unwrap();

    let err = lc.complete(task.id, other, json!({"summary": "x"})).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = lc.complete(task.id, analyst, json!("just text")).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationFailed(_)));

    let task = lc
        .complete(
            task.id,
            analyst,
            json!({
                "summary": "Effect is significant",
                "methodology": "Mixed-effects regression",
                "findings": ["X raises Y", "Effect holds across cohorts"],
                "statistics": {"p": 0.01},
                "limitations": ["Single site"]
            }),
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.completed_at.is_some());
    let score = task.verification_score.unwrap();
    assert!((0.0..=1.0).contains(&score));
    assert!(task.verification.is_some());
}

#[tokio::test]
async fn test_unscorable_result_still_completes() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "degraded").await;
    let scout = add_member(lc, lab.id, "scout").await;
    let task = propose(lc, lab.id, pi, "literature_review").await;
    lc.pick_up(task.id, scout).await.unwrap();

    let task = lc.complete(task.id, scout, json!({})).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.verification_score, Some(0.0));

    let verification = task.verification.unwrap();
    assert_eq!(verification["passed"], false);
    assert!(!verification["errors"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_first_critique_opens_critique_period() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "critiques").await;
    let critic = add_member(lc, lab.id, "critic").await;
    let scout = add_member(lc, lab.id, "scout").await;
    let task = propose(lc, lab.id, pi, "analysis").await;
    lc.pick_up(task.id, pi).await.unwrap();
    lc.complete(task.id, pi, json!({"summary": "done"})).await.unwrap();

    let err = lc.critique(task.id, scout, critique("no")).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let (task, first) = lc.critique(task.id, critic, critique("Sample is small")).await.unwrap();
    assert_eq!(task.status, TaskStatus::CritiquePeriod);
    assert_eq!(first.author_id, critic);

    let (task, _) = lc.critique(task.id, pi, critique("Agreed")).await.unwrap();
    assert_eq!(task.status, TaskStatus::CritiquePeriod);

    let critiques = lc.list_critiques(task.id).await.unwrap();
    assert_eq!(critiques.len(), 2);
    assert_eq!(critiques[0].id, first.id);

    let task = lc.start_voting(task.id, pi).await.unwrap();
    assert_eq!(task.status, TaskStatus::Voting);
}

#[tokio::test]
async fn test_only_pi_starts_voting() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "start-voting").await;
    let analyst = add_member(lc, lab.id, "research_analyst").await;
    let task = propose(lc, lab.id, pi, "analysis").await;
    lc.pick_up(task.id, analyst).await.unwrap();
    lc.complete(task.id, analyst, json!({"summary": "done"})).await.unwrap();

    let err = lc.start_voting(task.id, analyst).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_four_members_two_approvals_accept() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "four").await;
    let a = add_member(lc, lab.id, "scout").await;
    let b = add_member(lc, lab.id, "critic").await;
    let _c = add_member(lc, lab.id, "synthesizer").await;
    let task = task_in_voting(lc, lab.id, pi).await;

    let receipt = lc.vote(task.id, a, "approve", None).await.unwrap();
    assert!(!receipt.resolved);
    assert_eq!(receipt.summary.quorum, 2);
    assert_eq!(receipt.summary.active_members, 4);

    let receipt = lc.vote(task.id, b, "approve", Some("Solid")).await.unwrap();
    assert!(receipt.resolved);
    assert_eq!(receipt.summary.status, TaskStatus::Accepted);

    let task = lc.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Accepted);

    // Voting is closed once resolved
    let err = lc.vote(task.id, pi, "reject", None).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_five_members_majority_accepts() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "five").await;
    let a = add_member(lc, lab.id, "scout").await;
    let b = add_member(lc, lab.id, "critic").await;
    let c = add_member(lc, lab.id, "synthesizer").await;
    let _d = add_member(lc, lab.id, "research_analyst").await;
    let task = task_in_voting(lc, lab.id, pi).await;

    assert!(!lc.vote(task.id, a, "approve", None).await.unwrap().resolved);
    assert!(!lc.vote(task.id, b, "reject", None).await.unwrap().resolved);
    let receipt = lc.vote(task.id, c, "approve", None).await.unwrap();

    assert!(receipt.resolved);
    assert_eq!(receipt.summary.quorum, 3);
    assert_eq!(receipt.summary.tally.approve, 2);
    assert_eq!(receipt.summary.tally.reject, 1);
    assert_eq!(receipt.summary.status, TaskStatus::Accepted);
}

#[tokio::test]
async fn test_tie_rejects() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "tie").await;
    let a = add_member(lc, lab.id, "scout").await;
    let task = task_in_voting(lc, lab.id, pi).await;

    lc.vote(task.id, a, "approve", None).await.unwrap();
    let receipt = lc.vote(task.id, pi, "reject", None).await.unwrap();
    assert!(receipt.resolved);
    assert_eq!(receipt.summary.status, TaskStatus::Rejected);
}

#[tokio::test]
async fn test_revote_replaces_and_abstain_does_not_count() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "revote").await;
    let a = add_member(lc, lab.id, "scout").await;
    let b = add_member(lc, lab.id, "critic").await;
    let _c = add_member(lc, lab.id, "synthesizer").await;
    let _d = add_member(lc, lab.id, "research_analyst").await;
    let task = task_in_voting(lc, lab.id, pi).await;

    lc.vote(task.id, a, "approve", None).await.unwrap();
    let receipt = lc.vote(task.id, a, "reject", Some("Changed my mind")).await.unwrap();
    assert_eq!(receipt.summary.tally.reject, 1);
    assert_eq!(receipt.summary.tally.approve, 0);

    let receipt = lc.vote(task.id, b, "abstain", None).await.unwrap();
    assert!(!receipt.resolved);
    assert_eq!(receipt.summary.tally.substantive(), 1);

    let listing = lc.list_votes(task.id).await.unwrap();
    assert_eq!(listing.votes.len(), 2);
    assert_eq!(listing.summary.status, TaskStatus::Voting);
}

#[tokio::test]
async fn test_departure_resolves_on_read() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "departure").await;
    let a = add_member(lc, lab.id, "scout").await;
    let b = add_member(lc, lab.id, "critic").await;
    let c = add_member(lc, lab.id, "synthesizer").await;
    let _d = add_member(lc, lab.id, "research_analyst").await;
    let task = task_in_voting(lc, lab.id, pi).await;

    // Five active members: quorum is three
    lc.vote(task.id, a, "approve", None).await.unwrap();
    let receipt = lc.vote(task.id, b, "approve", None).await.unwrap();
    assert!(!receipt.resolved);

    // Four active members: quorum drops to two
    lc.leave_lab(lab.id, c).await.unwrap();
    let task = lc.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Accepted);
    assert!(task.resolved_at.is_some());
}

#[tokio::test]
async fn test_votes_of_departed_members_do_not_count() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "departed-votes").await;
    let a = add_member(lc, lab.id, "scout").await;
    let b = add_member(lc, lab.id, "critic").await;
    let c = add_member(lc, lab.id, "synthesizer").await;
    let task = task_in_voting(lc, lab.id, pi).await;

    let receipt = lc.vote(task.id, a, "reject", None).await.unwrap();
    assert!(!receipt.resolved);
    lc.leave_lab(lab.id, a).await.unwrap();

    let listing = lc.list_votes(task.id).await.unwrap();
    assert_eq!(listing.summary.tally.reject, 0);
    assert_eq!(listing.summary.active_members, 3);

    lc.vote(task.id, b, "approve", None).await.unwrap();
    let receipt = lc.vote(task.id, c, "approve", None).await.unwrap();
    assert!(receipt.resolved);
    assert_eq!(receipt.summary.status, TaskStatus::Accepted);
}

#[tokio::test]
async fn test_supersede_from_any_non_terminal_state() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "supersede").await;
    let scout = add_member(lc, lab.id, "scout").await;

    let task = propose(lc, lab.id, pi, "literature_review").await;
    let err = lc.supersede(task.id, scout).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let task = lc.supersede(task.id, pi).await.unwrap();
    assert_eq!(task.status, TaskStatus::Superseded);

    let err = lc.supersede(task.id, pi).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let voting = task_in_voting(lc, lab.id, pi).await;
    let voting = lc.supersede(voting.id, pi).await.unwrap();
    assert_eq!(voting.status, TaskStatus::Superseded);
}

#[tokio::test]
async fn test_list_tasks_filters_by_status() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "listing").await;
    let first = propose(lc, lab.id, pi, "analysis").await;
    propose(lc, lab.id, pi, "synthesis").await;
    lc.pick_up(first.id, pi).await.unwrap();

    assert_eq!(lc.list_tasks(lab.id, None).await.unwrap().len(), 2);
    let in_progress = lc.list_tasks(lab.id, Some("in_progress")).await.unwrap();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(in_progress[0].id, first.id);

    let err = lc.list_tasks(lab.id, Some("finished")).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationFailed(_)));
}

#[tokio::test]
async fn test_duplicate_slug_conflicts() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    setup_lab(lc, "dup").await;

    let err = lc.create_lab(Uuid::new_v4(), "dup", "Again").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_transitions_are_broadcast() {
    let state = setup_state(test_config()).await;
    let lc = &state.lifecycle;
    let (lab, pi) = setup_lab(lc, "events").await;
    let mut events = lc.subscribe();

    let task = propose(lc, lab.id, pi, "analysis").await;
    lc.pick_up(task.id, pi).await.unwrap();

    match events.recv().await.unwrap() {
        TaskEvent::TaskProposed { task_id, lab_id, .. } => {
            assert_eq!(task_id, task.id);
            assert_eq!(lab_id, lab.id);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        TaskEvent::TaskPickedUp { agent_id, .. } if agent_id == pi
    ));
}
