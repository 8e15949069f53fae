//! Axle-passage edge detector
//!
//! Turns raw sensor edges into completed [`PassageRecord`]s. Runs in the edge
//! context: every call is short and never waits. The detection state sits
//! behind a mutex that only edge handlers take, so the critical section plays
//! the role of an interrupt-masked region; the control loop never touches it.
//!
//! State machine:
//!
//! | Phase        | S1 edge                                   | S2 edge                        |
//! |--------------|-------------------------------------------|--------------------------------|
//! | Idle         | start passage, axles = 1 → FirstActive    | out of sequence, ignored       |
//! | FirstActive  | axles += 1 unless within debounce window  | emit record → SecondActive     |
//! | SecondActive | ignored                                   | out of sequence, ignored       |
//!
//! Leaving SecondActive depends on [`RearmPolicy`]. With `Immediate` the
//! completing handler goes straight back to Idle. With `OnConsume` the
//! detector waits for the control loop to acknowledge the record's sequence
//! number through a [`RearmHandle`]; the next edge handler then performs the
//! Idle transition itself.

use crate::domain::types::{PassageRecord, SensorEdge, SensorId};
use crate::infra::config::{Config, RearmPolicy};
use crate::infra::metrics::Metrics;
use crate::services::passage_queue::{PassageProducer, PushError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    FirstActive,
    SecondActive,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::FirstActive => "first_active",
            Phase::SecondActive => "second_active",
        }
    }
}

/// What a single edge did to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    PassageStarted,
    /// New axle counted; carries the running count
    AxleCounted(u32),
    /// S1 edge inside the debounce window
    Debounced,
    PassageCompleted(PassageRecord),
    /// Passage completed but the queue refused the record
    PassageDropped(PassageRecord),
    /// S2 edge outside FirstActive
    OutOfSequence,
    /// S1 edge while waiting for rearm
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DetectionState {
    phase: Phase,
    passage_start_ms: u64,
    last_axle_edge_ms: u64,
    axle_count: u32,
    /// Sequence of the record awaiting acknowledgement (OnConsume only)
    pending_seq: u64,
    next_seq: u64,
}

impl DetectionState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            passage_start_ms: 0,
            last_axle_edge_ms: 0,
            axle_count: 0,
            pending_seq: 0,
            next_seq: 1,
        }
    }
}

/// Read-only copy of the detection state, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionView {
    pub phase: Phase,
    pub passage_start_ms: u64,
    pub last_axle_edge_ms: u64,
    pub axle_count: u32,
}

/// Acknowledges consumed passage records back to the detector
///
/// Held by the control loop. Only an atomic word crosses the context
/// boundary; the detection state itself stays with the edge handlers.
#[derive(Debug, Clone)]
pub struct RearmHandle {
    acked_seq: Arc<AtomicU64>,
}

impl RearmHandle {
    /// Mark every record up to and including `seq` as consumed
    pub fn acknowledge(&self, seq: u64) {
        self.acked_seq.fetch_max(seq, Ordering::Release);
    }
}

pub struct EdgeDetector {
    state: Mutex<DetectionState>,
    queue: PassageProducer,
    debounce_ms: u64,
    rearm: RearmPolicy,
    acked_seq: Arc<AtomicU64>,
    metrics: Arc<Metrics>,
}

impl EdgeDetector {
    pub fn new(
        debounce_ms: u64,
        rearm: RearmPolicy,
        queue: PassageProducer,
        metrics: Arc<Metrics>,
    ) -> (Self, RearmHandle) {
        let acked_seq = Arc::new(AtomicU64::new(0));
        let detector = Self {
            state: Mutex::new(DetectionState::new()),
            queue,
            debounce_ms,
            rearm,
            acked_seq: acked_seq.clone(),
            metrics,
        };
        (detector, RearmHandle { acked_seq })
    }

    pub fn from_config(
        config: &Config,
        queue: PassageProducer,
        metrics: Arc<Metrics>,
    ) -> (Self, RearmHandle) {
        Self::new(config.debounce_ms(), config.rearm_policy(), queue, metrics)
    }

    /// Handle one active edge. Never blocks.
    pub fn on_edge(&self, edge: SensorEdge) -> EdgeOutcome {
        self.metrics.record_edge(edge.sensor);

        let (outcome, phase) = {
            let mut state = self.state.lock();
            self.try_rearm(&mut state);
            let outcome = self.step(&mut state, edge);
            (outcome, state.phase)
        };

        self.report(edge, outcome, phase);
        outcome
    }

    pub fn rearm_policy(&self) -> RearmPolicy {
        self.rearm
    }

    pub fn view(&self) -> DetectionView {
        let state = self.state.lock();
        DetectionView {
            phase: state.phase,
            passage_start_ms: state.passage_start_ms,
            last_axle_edge_ms: state.last_axle_edge_ms,
            axle_count: state.axle_count,
        }
    }

    fn try_rearm(&self, state: &mut DetectionState) {
        if state.phase == Phase::SecondActive
            && self.acked_seq.load(Ordering::Acquire) >= state.pending_seq
        {
            state.phase = Phase::Idle;
        }
    }

    fn step(&self, state: &mut DetectionState, edge: SensorEdge) -> EdgeOutcome {
        match (state.phase, edge.sensor) {
            (Phase::Idle, SensorId::S1) => {
                state.passage_start_ms = edge.at_ms;
                state.last_axle_edge_ms = edge.at_ms;
                state.axle_count = 1;
                state.phase = Phase::FirstActive;
                EdgeOutcome::PassageStarted
            }
            (Phase::FirstActive, SensorId::S1) => {
                if edge.at_ms.saturating_sub(state.last_axle_edge_ms) > self.debounce_ms {
                    state.axle_count += 1;
                    state.last_axle_edge_ms = edge.at_ms;
                    EdgeOutcome::AxleCounted(state.axle_count)
                } else {
                    EdgeOutcome::Debounced
                }
            }
            (Phase::FirstActive, SensorId::S2) => {
                let record = PassageRecord {
                    seq: state.next_seq,
                    elapsed_ms: edge.at_ms.saturating_sub(state.passage_start_ms),
                    axle_count: state.axle_count.max(2),
                };
                state.next_seq += 1;

                match self.queue.push(record) {
                    Ok(()) => {
                        state.pending_seq = record.seq;
                        state.phase = match self.rearm {
                            RearmPolicy::Immediate => Phase::Idle,
                            RearmPolicy::OnConsume => Phase::SecondActive,
                        };
                        EdgeOutcome::PassageCompleted(record)
                    }
                    // Nothing will ever acknowledge a dropped record
                    Err(PushError::Full(record)) | Err(PushError::Closed(record)) => {
                        state.phase = Phase::Idle;
                        EdgeOutcome::PassageDropped(record)
                    }
                }
            }
            (Phase::SecondActive, SensorId::S1) => EdgeOutcome::Ignored,
            (Phase::Idle, SensorId::S2) | (Phase::SecondActive, SensorId::S2) => {
                EdgeOutcome::OutOfSequence
            }
        }
    }

    fn report(&self, edge: SensorEdge, outcome: EdgeOutcome, phase: Phase) {
        match outcome {
            EdgeOutcome::PassageStarted => {
                debug!(at_ms = %edge.at_ms, "passage_started");
            }
            EdgeOutcome::AxleCounted(axles) => {
                debug!(axles = %axles, at_ms = %edge.at_ms, "axle_counted");
            }
            EdgeOutcome::Debounced => {
                self.metrics.record_debounced();
                tracing::trace!(at_ms = %edge.at_ms, "axle_edge_debounced");
            }
            EdgeOutcome::PassageCompleted(record) => {
                self.metrics.record_passage_completed();
                info!(
                    seq = %record.seq,
                    axles = %record.axle_count,
                    elapsed_ms = %record.elapsed_ms,
                    queue_depth = %self.queue.depth(),
                    "passage_completed"
                );
            }
            EdgeOutcome::PassageDropped(record) => {
                error!(
                    seq = %record.seq,
                    axles = %record.axle_count,
                    elapsed_ms = %record.elapsed_ms,
                    overflows = %self.queue.overflow_count(),
                    "passage_queue_full_record_dropped"
                );
            }
            EdgeOutcome::OutOfSequence => {
                self.metrics.record_out_of_sequence();
                warn!(sensor = %edge.sensor, phase = %phase.as_str(), "s2_out_of_sequence");
            }
            EdgeOutcome::Ignored => {
                debug!(sensor = %edge.sensor, phase = %phase.as_str(), "edge_ignored_awaiting_rearm");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::passage_queue::{passage_queue, PassageConsumer};

    fn s1(at_ms: u64) -> SensorEdge {
        SensorEdge::new(SensorId::S1, at_ms)
    }

    fn s2(at_ms: u64) -> SensorEdge {
        SensorEdge::new(SensorId::S2, at_ms)
    }

    fn detector(
        rearm: RearmPolicy,
        capacity: usize,
    ) -> (EdgeDetector, RearmHandle, PassageConsumer, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let (producer, consumer) = passage_queue(capacity, metrics.clone());
        let (detector, handle) = EdgeDetector::new(100, rearm, producer, metrics.clone());
        (detector, handle, consumer, metrics)
    }

    #[test]
    fn test_two_axle_passage() {
        let (detector, _, mut queue, _) = detector(RearmPolicy::Immediate, 10);

        assert_eq!(detector.on_edge(s1(1000)), EdgeOutcome::PassageStarted);
        assert_eq!(detector.on_edge(s1(1300)), EdgeOutcome::AxleCounted(2));

        let expected = PassageRecord { seq: 1, elapsed_ms: 400, axle_count: 2 };
        assert_eq!(detector.on_edge(s2(1400)), EdgeOutcome::PassageCompleted(expected));
        assert_eq!(queue.try_pop(), Some(expected));
        assert_eq!(detector.view().phase, Phase::Idle);
    }

    #[test]
    fn test_single_axle_clamped_to_two() {
        let (detector, _, mut queue, _) = detector(RearmPolicy::Immediate, 10);

        detector.on_edge(s1(0));
        detector.on_edge(s2(250));

        let record = queue.try_pop().unwrap();
        assert_eq!(record.axle_count, 2);
        assert_eq!(record.elapsed_ms, 250);
    }

    #[test]
    fn test_debounce_window_is_strict() {
        let (detector, _, mut queue, metrics) = detector(RearmPolicy::Immediate, 10);

        detector.on_edge(s1(0));
        assert_eq!(detector.on_edge(s1(50)), EdgeOutcome::Debounced);
        // Exactly at the window edge still counts as bounce
        assert_eq!(detector.on_edge(s1(100)), EdgeOutcome::Debounced);
        assert_eq!(detector.on_edge(s1(101)), EdgeOutcome::AxleCounted(2));
        // Window restarts from the last counted axle
        assert_eq!(detector.on_edge(s1(150)), EdgeOutcome::Debounced);
        assert_eq!(detector.on_edge(s1(300)), EdgeOutcome::AxleCounted(3));
        detector.on_edge(s2(400));

        assert_eq!(queue.try_pop().unwrap().axle_count, 3);
        assert_eq!(metrics.edges_debounced(), 3);
    }

    #[test]
    fn test_s2_in_idle_is_ignored() {
        let (detector, _, mut queue, metrics) = detector(RearmPolicy::Immediate, 10);
        let before = detector.view();

        assert_eq!(detector.on_edge(s2(500)), EdgeOutcome::OutOfSequence);

        assert_eq!(detector.view(), before);
        assert_eq!(queue.try_pop(), None);
        assert_eq!(metrics.edges_out_of_sequence(), 1);
    }

    #[test]
    fn test_s2_in_second_active_is_ignored() {
        let (detector, _, mut queue, _) = detector(RearmPolicy::OnConsume, 10);

        detector.on_edge(s1(0));
        detector.on_edge(s1(200));
        detector.on_edge(s2(300));
        assert!(queue.try_pop().is_some());

        let before = detector.view();
        assert_eq!(before.phase, Phase::SecondActive);
        assert_eq!(detector.on_edge(s2(350)), EdgeOutcome::OutOfSequence);
        assert_eq!(detector.view(), before);
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_on_consume_waits_for_acknowledgement() {
        let (detector, handle, mut queue, _) = detector(RearmPolicy::OnConsume, 10);

        detector.on_edge(s1(0));
        detector.on_edge(s2(100));

        // Next vehicle arrives before the control loop consumed the record
        assert_eq!(detector.on_edge(s1(150)), EdgeOutcome::Ignored);
        assert_eq!(detector.view().phase, Phase::SecondActive);

        let record = queue.try_pop().unwrap();
        handle.acknowledge(record.seq);

        assert_eq!(detector.on_edge(s1(400)), EdgeOutcome::PassageStarted);
        assert_eq!(detector.view().passage_start_ms, 400);
    }

    #[test]
    fn test_on_consume_ignores_stale_acknowledgement() {
        let (detector, handle, mut queue, _) = detector(RearmPolicy::OnConsume, 10);

        detector.on_edge(s1(0));
        detector.on_edge(s2(100));
        let first = queue.try_pop().unwrap();
        handle.acknowledge(first.seq);

        detector.on_edge(s1(200));
        detector.on_edge(s2(300));

        // The first acknowledgement does not cover the second record
        assert_eq!(detector.on_edge(s1(350)), EdgeOutcome::Ignored);
        let second = queue.try_pop().unwrap();
        assert_eq!(second.seq, 2);
        handle.acknowledge(second.seq);
        assert_eq!(detector.on_edge(s1(500)), EdgeOutcome::PassageStarted);
    }

    #[test]
    fn test_immediate_rearm_accepts_next_vehicle() {
        let (detector, _, mut queue, _) = detector(RearmPolicy::Immediate, 10);

        detector.on_edge(s1(0));
        detector.on_edge(s2(100));
        assert_eq!(detector.on_edge(s1(110)), EdgeOutcome::PassageStarted);
        detector.on_edge(s2(310));

        assert_eq!(queue.try_pop().unwrap().seq, 1);
        let second = queue.try_pop().unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(second.elapsed_ms, 200);
    }

    #[test]
    fn test_overflow_drops_and_rearms() {
        let (detector, handle, mut queue, metrics) = detector(RearmPolicy::OnConsume, 1);

        detector.on_edge(s1(0));
        assert!(matches!(detector.on_edge(s2(100)), EdgeOutcome::PassageCompleted(_)));

        // Rearm through acknowledgement without draining the queue
        handle.acknowledge(1);

        detector.on_edge(s1(200));
        assert!(matches!(detector.on_edge(s2(300)), EdgeOutcome::PassageDropped(_)));
        assert_eq!(metrics.passages_dropped(), 1);

        // Dropped record cannot be acknowledged, so the detector is already Idle
        assert_eq!(detector.view().phase, Phase::Idle);
        assert_eq!(queue.try_pop().unwrap().seq, 1);
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_emitted_axle_count_never_below_two() {
        let (detector, _, mut queue, _) = detector(RearmPolicy::Immediate, 16);

        let mut t = 0;
        for extra_axles in 0..5u64 {
            detector.on_edge(s1(t));
            for i in 0..extra_axles {
                detector.on_edge(s1(t + 150 * (i + 1)));
            }
            t += 150 * (extra_axles + 1);
            detector.on_edge(s2(t));
            t += 1000;
        }

        let mut count = 0;
        while let Some(record) = queue.try_pop() {
            assert!(record.axle_count >= 2);
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[test]
    fn test_concurrent_edge_handlers() {
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let (producer, _consumer) = passage_queue(1024, metrics.clone());
        let (detector, _) = EdgeDetector::new(100, RearmPolicy::Immediate, producer, metrics.clone());
        let detector = Arc::new(detector);

        let handles: Vec<_> = [SensorId::S1, SensorId::S2]
            .into_iter()
            .map(|sensor| {
                let d = detector.clone();
                thread::spawn(move || {
                    for i in 0..500u64 {
                        d.on_edge(SensorEdge::new(sensor, i * 10));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let view = detector.view();
        assert!(view.phase != Phase::SecondActive);
        assert_eq!(metrics.report().edges_s1_total, 500);
    }
}
