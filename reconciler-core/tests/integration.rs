//! Integration Tests for the Reconciler Core
//!
//! These tests drive the reconciler the way a work loop would and verify
//! that lanes, staged updates, context propagation, caches and async actions
//! work together correctly.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use reconciler_core::cache::Cache;
use reconciler_core::config::ReconcilerConfig;
use reconciler_core::context::{ContextRegistry, ContextValue, RendererSlot};
use reconciler_core::fiber::{FiberId, FiberMode, QueueId, RootId, WorkTag};
use reconciler_core::lane::{
    EventPriority, Lanes, DEFAULT_LANE, NO_LANES, OFFSCREEN_LANE, SYNC_LANE, TOTAL_LANES,
};
use reconciler_core::runtime::ExecutionContext;
use reconciler_core::scheduler::{ManualScheduler, SchedulerPriority, TokioScheduler};
use reconciler_core::Reconciler;

fn reconciler() -> (Reconciler, ManualScheduler) {
    let scheduler = ManualScheduler::new();
    let reconciler =
        Reconciler::new(ReconcilerConfig::default(), Arc::new(scheduler.clone())).unwrap();
    (reconciler, scheduler)
}

/// A root with one component owning a state queue.
fn mount_component(reconciler: &mut Reconciler) -> (RootId, FiberId, FiberId, QueueId) {
    let tree = reconciler.tree_mut();
    let (root, host) = tree.create_root(FiberMode::CONCURRENT);
    let component = tree.create_child(host, WorkTag::FunctionComponent);
    let queue = tree.create_queue(component);
    (root, host, component, queue)
}

/// Test that every staged update lands in its queue's ring exactly once and
/// that each ring stays closed.
#[test]
fn flush_builds_closed_rings() {
    let (mut reconciler, _) = reconciler();
    let tree = reconciler.tree_mut();
    let (_, host) = tree.create_root(FiberMode::CONCURRENT);
    let mut targets = Vec::new();
    for _ in 0..3 {
        let fiber = tree.create_child(host, WorkTag::FunctionComponent);
        let queue = tree.create_queue(fiber);
        targets.push((fiber, queue));
    }

    let priorities = [
        EventPriority::Default,
        EventPriority::Discrete,
        EventPriority::Continuous,
        EventPriority::Idle,
    ];
    let mut expected: Vec<Vec<_>> = vec![Vec::new(); targets.len()];
    for i in 0..20 {
        let slot = (i * 7) % targets.len();
        let (fiber, queue) = targets[slot];
        let dispatched = reconciler.batched_updates(priorities[i % priorities.len()], |r| {
            r.dispatch_update(fiber, queue, Arc::new(i)).unwrap()
        });
        expected[slot].push(dispatched.update);
    }
    reconciler.finish_queueing_concurrent_updates().unwrap();

    let tree = reconciler.tree();
    for ((_, queue), expected) in targets.iter().zip(&expected) {
        let ordered = tree.pending_updates(*queue);
        assert_eq!(&ordered, expected);
        let unique: HashSet<_> = ordered.iter().collect();
        assert_eq!(unique.len(), ordered.len());

        // Following `next` from the newest update cycles back to it.
        let newest = tree.queue(*queue).pending().unwrap();
        let mut cursor = newest;
        for _ in 0..ordered.len() {
            cursor = tree.update(cursor).next().unwrap();
        }
        assert_eq!(cursor, newest);
    }
}

/// Test that lane merging is idempotent and commutative.
#[test]
fn lane_merge_algebra() {
    let mut sets: Vec<Lanes> = (0..TOTAL_LANES).map(Lanes::from_index).collect();
    sets.push(NO_LANES);
    sets.push(SYNC_LANE | DEFAULT_LANE);
    sets.push(Lanes::from_bits(0x7fff_ffff));

    for &a in &sets {
        for &b in &sets {
            assert_eq!(a.merge(b).merge(b), a.merge(b));
            assert_eq!(a.merge(b), b.merge(a));
            assert!(a.is_subset_of(a.merge(b)));
        }
    }
}

/// Test that a lane propagated from a deep fiber reaches every ancestor and
/// the root's pending set.
#[test]
fn propagated_lane_reaches_every_ancestor() {
    let (mut reconciler, _) = reconciler();
    let tree = reconciler.tree_mut();
    let (root, host) = tree.create_root(FiberMode::CONCURRENT);
    let mut chain = vec![host];
    for _ in 0..5 {
        let parent = *chain.last().unwrap();
        chain.push(tree.create_child(parent, WorkTag::FunctionComponent));
    }
    let leaf = *chain.last().unwrap();
    let queue = tree.create_queue(leaf);

    let dispatched = reconciler
        .batched_updates(EventPriority::Continuous, |r| r.dispatch_update(leaf, queue, Arc::new(())))
        .unwrap();
    reconciler.finish_queueing_concurrent_updates().unwrap();

    let tree = reconciler.tree();
    for ancestor in &chain[..chain.len() - 1] {
        assert!(dispatched.lane.is_subset_of(tree[*ancestor].child_lanes()));
    }
    assert!(dispatched.lane.is_subset_of(tree.root(root).pending_lanes()));
}

/// Test that enqueue order is preserved within a queue regardless of lane
/// priority.
#[test]
fn queue_order_ignores_priority() {
    let (mut reconciler, _) = reconciler();
    let (_, _, component, queue) = mount_component(&mut reconciler);

    let u1 = reconciler
        .batched_updates(EventPriority::Default, |r| r.dispatch_update(component, queue, Arc::new("U1")))
        .unwrap();
    let u2 = reconciler
        .batched_updates(EventPriority::Discrete, |r| r.dispatch_update(component, queue, Arc::new("U2")))
        .unwrap();
    assert_eq!(u1.lane, DEFAULT_LANE);
    assert_eq!(u2.lane, SYNC_LANE);

    reconciler.finish_queueing_concurrent_updates().unwrap();
    let tree = reconciler.tree();
    let ordered = tree.pending_updates(queue);
    assert_eq!(ordered, vec![u1.update, u2.update]);
    assert_eq!(tree.update(ordered[0]).payload::<&str>(), Some(&"U1"));
    assert_eq!(tree.update(ordered[1]).payload::<&str>(), Some(&"U2"));
}

/// Test that each event and each top-level transition claims its own
/// transition lane, while transitions inside one event share theirs.
#[test]
fn transition_lanes_rotate_between_events() {
    let (mut reconciler, _) = reconciler();
    let (_, _, component, _) = mount_component(&mut reconciler);

    let standalone: Vec<Lanes> = (0..2)
        .map(|_| reconciler.start_transition(|r| r.request_update_lane(component)))
        .collect();
    let (first, second) = reconciler.batched_updates(EventPriority::Discrete, |r| {
        let first = r.start_transition(|r| r.request_update_lane(component));
        let second = r.start_transition(|r| r.request_update_lane(component));
        (first, second)
    });
    let next_event = reconciler.batched_updates(EventPriority::Discrete, |r| {
        r.start_transition(|r| r.request_update_lane(component))
    });

    assert_eq!(first, second);
    let distinct: HashSet<Lanes> = [standalone[0], standalone[1], first, next_event]
        .into_iter()
        .collect();
    assert_eq!(distinct.len(), 4);
    assert!(distinct.iter().all(|lane| lane.is_transition_lane()));
}

/// Test that an update needing no render stays staged while a render is
/// paused, and joins its queue at the next flush.
#[test]
fn bailout_update_waits_for_paused_render() {
    let (mut reconciler, _) = reconciler();
    let (root, _, component, queue) = mount_component(&mut reconciler);

    let first = reconciler
        .dispatch_update(component, queue, Arc::new(1u32))
        .unwrap();
    reconciler.prepare_fresh_stack(root).unwrap();
    assert!(reconciler.is_rendering());
    assert!(!reconciler
        .execution_context()
        .contains(ExecutionContext::RENDER));

    let quiet = reconciler
        .dispatch_without_render(component, queue, Arc::new(1u32))
        .unwrap();
    assert_eq!(reconciler.staged_updates(), 1);
    assert_eq!(reconciler.tree().pending_updates(queue), vec![first.update]);
    assert_eq!(reconciler.concurrently_updated_lanes(), NO_LANES);

    reconciler.commit_root(root, NO_LANES).unwrap();
    assert!(reconciler.tree().root(root).pending_lanes().is_empty());

    reconciler.finish_queueing_concurrent_updates().unwrap();
    assert_eq!(reconciler.staged_updates(), 0);
    assert_eq!(
        reconciler.tree().pending_updates(queue),
        vec![first.update, quiet]
    );
}

/// Test that lazy propagation marks a deep consumer without touching an
/// unrelated sibling subtree.
#[test]
fn lazy_context_propagation_reaches_deep_consumer() {
    let (mut reconciler, _) = reconciler();
    let theme = reconciler
        .contexts()
        .registry()
        .create_context("Theme", ContextValue::new(0));

    let tree = reconciler.tree_mut();
    let (root, host) = tree.create_root(FiberMode::CONCURRENT);
    let provider = tree.create_child(host, WorkTag::ContextProvider(theme));
    let a = tree.create_child(provider, WorkTag::FunctionComponent);
    let b = tree.create_child(a, WorkTag::FunctionComponent);
    let consumer = tree.create_child(b, WorkTag::FunctionComponent);
    let sibling = tree.create_child(provider, WorkTag::FunctionComponent);
    let provider_queue = tree.create_queue(provider);

    // First render: the provider holds 1 and the consumer reads it.
    let one = ContextValue::new(1);
    reconciler.push_provider(provider, theme, one.clone());
    reconciler.begin_work(consumer);
    let read = reconciler.read_context(theme).unwrap();
    reconciler.complete_work();
    reconciler.pop_provider(provider, theme).unwrap();
    assert!(read.same_value(&one));
    reconciler.tree_mut().set_memoized_props(provider, one);

    // The provider's owner sets the value to 2 and a render starts.
    reconciler
        .dispatch_update(provider, provider_queue, Arc::new(2))
        .unwrap();
    let render_lanes = reconciler.prepare_fresh_stack(root).unwrap();
    let two = ContextValue::new(2);
    let provider_wip = reconciler
        .tree_mut()
        .create_work_in_progress(provider, Some(two.clone()));

    // The children bail out, so propagation has to find the consumer.
    reconciler.push_provider(provider_wip, theme, two);
    reconciler.propagate_on_bailout(provider_wip).unwrap();

    let tree = reconciler.tree();
    assert!(render_lanes.is_subset_of(tree[consumer].lanes()));
    assert!(render_lanes.is_subset_of(tree[a].child_lanes()));
    assert!(render_lanes.is_subset_of(tree[b].child_lanes()));
    assert_eq!(tree[sibling].lanes(), NO_LANES);
    assert_eq!(tree[sibling].child_lanes(), NO_LANES);
    assert_eq!(tree[a].lanes(), NO_LANES);
    assert!(reconciler.check_if_context_changed(consumer));
    assert!(!reconciler.check_if_context_changed(sibling));

    // Rendering the consumer reports that its context changed.
    assert!(reconciler.begin_work(consumer));
    reconciler.complete_work();
    assert!(!reconciler.begin_work(sibling));
    reconciler.complete_work();

    reconciler.pop_provider(provider_wip, theme).unwrap();
}

/// Test that two renderers sharing contexts do not see each other's
/// provider values.
#[test]
fn renderer_slots_are_isolated() {
    let registry = ContextRegistry::new();
    let locale = registry.create_context("Locale", ContextValue::new("en"));
    let mut primary = Reconciler::with_registry(
        ReconcilerConfig::default(),
        Arc::new(ManualScheduler::new()),
        registry.clone(),
    )
    .unwrap();
    let config = ReconcilerConfig {
        renderer_slot: RendererSlot::Secondary,
        ..ReconcilerConfig::default()
    };
    let mut secondary =
        Reconciler::with_registry(config, Arc::new(ManualScheduler::new()), registry).unwrap();

    let (_, primary_host, _, _) = mount_component(&mut primary);
    let (_, _, secondary_component, _) = mount_component(&mut secondary);

    primary.push_provider(primary_host, locale, ContextValue::new("fr"));
    secondary.begin_work(secondary_component);
    let seen = secondary.read_context(locale).unwrap();
    secondary.complete_work();
    primary.pop_provider(primary_host, locale).unwrap();

    assert_eq!(seen.downcast_ref::<&str>(), Some(&"en"));
}

/// Test that releasing a cache as often as it was retained schedules its
/// abort exactly once, even if released again afterwards.
#[test]
fn cache_abort_fires_once() {
    let (reconciler, scheduler) = reconciler();
    let cache = Cache::new();
    let signal = cache.signal();
    for _ in 0..3 {
        reconciler.retain_cache(&cache);
    }
    for _ in 0..5 {
        reconciler.release_cache(&cache);
    }

    assert_eq!(cache.ref_count(), 0);
    assert_eq!(scheduler.pending_priorities(), vec![SchedulerPriority::Low]);
    assert!(!signal.is_aborted());
    assert_eq!(scheduler.run_all(), 1);
    assert!(signal.is_aborted());
}

/// Test that a cache abort scheduled on tokio wakes consumers waiting on
/// the abort signal.
#[tokio::test]
async fn cache_abort_through_tokio_scheduler() {
    let scheduler = TokioScheduler::current().unwrap();
    let reconciler = Reconciler::new(ReconcilerConfig::default(), Arc::new(scheduler)).unwrap();
    let cache = Cache::new();
    let value = cache.get_for_type(|| String::from("payload"));
    let signal = cache.signal();

    reconciler.retain_cache(&cache);
    reconciler.release_cache(&cache);
    signal.aborted().await;
    assert_eq!(*value, "payload");
}

/// Test that concurrently started async actions share one scope whose
/// listeners fire once, in order, after every action settled.
#[tokio::test]
async fn async_actions_share_one_scope() {
    let (mut reconciler, _) = reconciler();
    let order = Arc::new(Mutex::new(Vec::new()));
    let fired = Arc::new(AtomicUsize::new(0));

    let mut senders = Vec::new();
    let mut handles = Vec::new();
    let mut lanes = Vec::new();
    for i in 0..3 {
        let (tx, rx) = oneshot::channel::<Result<u32, String>>();
        senders.push(tx);
        let handle = reconciler
            .entangle_async_action(async move { rx.await.unwrap_or(Err("dropped".into())) })
            .unwrap();
        handles.push(handle);
        lanes.push(reconciler.actions().peek_entangled_action_lane());

        let thenable = reconciler.entangled_action_thenable().unwrap();
        let (order, fired) = (order.clone(), fired.clone());
        thenable.then(move || {
            fired.fetch_add(1, Ordering::SeqCst);
            order.lock().push(i);
        });
    }
    assert!(lanes.iter().all(|lane| *lane == lanes[0] && lane.is_transition_lane()));
    let thenable = reconciler.entangled_action_thenable().unwrap();

    let mut outcomes = Vec::new();
    for (i, (tx, handle)) in senders.into_iter().zip(handles).enumerate() {
        let outcome = if i == 1 {
            Err(format!("action {i} failed"))
        } else {
            Ok(i as u32)
        };
        tx.send(outcome).unwrap();
        outcomes.push(handle.await.unwrap());
        if i < 2 {
            assert_eq!(fired.load(Ordering::SeqCst), 0);
        }
    }

    thenable.wait().await;
    assert_eq!(fired.load(Ordering::SeqCst), 3);
    assert_eq!(*order.lock(), vec![0, 1, 2]);
    assert!(outcomes[1].is_err());
    assert!(reconciler.entangled_action_thenable().is_none());
}

/// Test that an update inside a hidden boundary is parked until the
/// boundary is revealed.
#[test]
fn hidden_updates_wait_for_reveal() {
    let (mut reconciler, _) = reconciler();
    let tree = reconciler.tree_mut();
    let (root, host) = tree.create_root(FiberMode::CONCURRENT);
    let boundary = tree.create_child(host, WorkTag::Offscreen);
    let instance = tree.create_offscreen(boundary, false);
    let component = tree.create_child(boundary, WorkTag::FunctionComponent);
    let queue = tree.create_queue(component);

    let dispatched = reconciler
        .dispatch_update(component, queue, Arc::new(()))
        .unwrap();
    reconciler.finish_queueing_concurrent_updates().unwrap();

    let tree = reconciler.tree();
    assert_eq!(tree.update(dispatched.update).lane(), DEFAULT_LANE | OFFSCREEN_LANE);
    assert!(DEFAULT_LANE.is_subset_of(tree.root(root).pending_lanes()));

    let revealed = reconciler
        .tree_mut()
        .reveal_hidden_updates(instance, DEFAULT_LANE);
    assert_eq!(revealed, vec![dispatched.update]);
    assert_eq!(reconciler.tree().update(dispatched.update).lane(), DEFAULT_LANE);
}

/// Test that a configuration loaded from JSON drives the reconciler.
#[test]
fn config_from_json_drives_limits() {
    let config = ReconcilerConfig::from_json(
        r#"{ "rerender_limit": 1, "cache_abort_priority": "idle" }"#,
    )
    .unwrap();
    let scheduler = ManualScheduler::new();
    let mut reconciler = Reconciler::new(config, Arc::new(scheduler.clone())).unwrap();
    let (_, _, component, _) = mount_component(&mut reconciler);

    reconciler.begin_work(component);
    assert!(reconciler.rerender().is_ok());
    assert!(reconciler.rerender().is_err());
    reconciler.complete_work();

    let cache = Cache::new();
    reconciler.retain_cache(&cache);
    reconciler.release_cache(&cache);
    assert_eq!(scheduler.pending_priorities(), vec![SchedulerPriority::Idle]);
}
